//! Things with identity: blocks, lines and transcription layers keep their id
//! while their geometry or text changes.

pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
