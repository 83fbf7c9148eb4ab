//! Command/event state machines. `DocumentPart` is the one aggregate in the
//! workflow: every stage change goes through `execute`.

pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Bumped once per applied event; repositories compare it on save to
    /// detect concurrent writers.
    fn version(&self) -> u64;
}

/// Pure decide/evolve pair.
///
/// `handle` inspects state and returns the events a command produces (or an
/// error), without touching `self`. `apply` folds one event into state. No IO
/// happens in either; the caller saves the result.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// `handle` followed by `apply` for each resulting event. An empty event
    /// list means the command was a no-op.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}
