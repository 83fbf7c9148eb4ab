//! Natural reading order of a part's lines.
//!
//! Each line gets an origin point: the first baseline vertex when reading
//! left-to-right, the last one right-to-left, or the mask vertex nearest the
//! page origin when there is no baseline. Lines are then sorted with a
//! heuristic comparator:
//!
//! - lines of different blocks (or without a block) compare by the distance
//!   from the page origin to their block's nearest vertex, or to their own
//!   origin point when unattached
//! - lines of the same block on roughly the same row compare by distance to
//!   the page origin, otherwise by vertical position
//!
//! The row test uses a "band" derived from the spread of the origin points,
//! so the comparator is not transitive in general. That heuristic is kept as
//! is. Sorting goes through a merge sort that only needs a consistent answer
//! per pair and never panics on an inconsistent order.

use std::cmp::Ordering;

use folio_core::{BlockId, LineId};
use folio_geometry::{Point, distance};

use crate::layout::{Block, Line, ReadDirection};

/// New order index for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderChange {
    pub line_id: LineId,
    pub order: u32,
}

#[derive(Debug, Clone, Copy)]
struct SortKey {
    id: LineId,
    block: Option<BlockId>,
    origin: Option<Point>,
    /// Block's vertex nearest the page origin, or `origin` when unattached.
    anchor: Option<Point>,
}

struct Comparator {
    page_origin: Point,
    band: f64,
}

impl Comparator {
    fn compare(&self, a: &SortKey, b: &SortKey) -> Ordering {
        let same_block = a.block.is_some() && a.block == b.block;

        let (Some(pa), Some(pb)) = (a.origin, b.origin) else {
            return Ordering::Equal;
        };

        if !same_block {
            return match (a.anchor, b.anchor) {
                (Some(x), Some(y)) => self.by_distance(x, y),
                _ => Ordering::Equal,
            };
        }

        if self.band > 0.0 && (pa.y - pb.y).abs() < self.band {
            return self.by_distance(pa, pb);
        }
        pa.y.partial_cmp(&pb.y).unwrap_or(Ordering::Equal)
    }

    fn by_distance(&self, a: Point, b: Point) -> Ordering {
        distance(a, self.page_origin)
            .partial_cmp(&distance(b, self.page_origin))
            .unwrap_or(Ordering::Equal)
    }
}

fn page_origin(direction: ReadDirection, page_width: f64) -> Point {
    match direction {
        ReadDirection::Ltr => Point::ORIGIN,
        ReadDirection::Rtl => Point::new(page_width, 0.0),
    }
}

fn line_origin(line: &Line, direction: ReadDirection, page_origin: Point) -> Option<Point> {
    let point = match (&line.baseline, &line.mask) {
        (Some(baseline), _) => match direction {
            ReadDirection::Ltr => baseline.first(),
            ReadDirection::Rtl => baseline.last(),
        },
        (None, Some(mask)) => mask.nearest_vertex(page_origin),
        (None, None) => return None,
    };
    point.is_finite().then_some(point)
}

/// Line ids in reading order.
///
/// `blocks` is searched for each line's block; a line pointing at a block not
/// in the slice is treated as unattached. `page_width` positions the origin
/// for right-to-left documents.
pub fn reading_order(
    lines: &[Line],
    blocks: &[Block],
    direction: ReadDirection,
    page_width: f64,
) -> Vec<LineId> {
    if lines.is_empty() {
        return Vec::new();
    }

    let origin = page_origin(direction, page_width);

    let keys: Vec<SortKey> = lines
        .iter()
        .map(|line| {
            let own = line_origin(line, direction, origin);
            let block = line
                .block
                .and_then(|id| blocks.iter().find(|b| b.id == id));
            let anchor = match block {
                Some(b) => Some(b.polygon.nearest_vertex(origin)),
                None => own,
            };
            SortKey {
                id: line.id,
                block: block.map(|b| b.id),
                origin: own,
                anchor,
            }
        })
        .collect();

    let cmp = Comparator {
        page_origin: origin,
        band: average_line_height(&keys),
    };

    merge_sort_by(keys, &|a, b| cmp.compare(a, b))
        .into_iter()
        .map(|k| k.id)
        .collect()
}

/// Horizontal spread of the origin points divided by the line count.
fn average_line_height(keys: &[SortKey]) -> f64 {
    let xs: Vec<f64> = keys.iter().filter_map(|k| k.origin).map(|p| p.x).collect();
    if xs.is_empty() {
        return 0.0;
    }
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let avg = (max - min) / keys.len() as f64;
    if avg.is_finite() { avg } else { 0.0 }
}

/// Stable top-down merge sort.
fn merge_sort_by<T: Copy>(items: Vec<T>, cmp: &dyn Fn(&T, &T) -> Ordering) -> Vec<T> {
    if items.len() <= 1 {
        return items;
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort_by(left, cmp);
    let right = merge_sort_by(right, cmp);

    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if cmp(&right[j], &left[i]) == Ordering::Less {
            out.push(right[j]);
            j += 1;
        } else {
            out.push(left[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
    out
}

/// Order writes needed to bring `lines` to `ordered`; lines already at their
/// index are skipped.
pub fn reorder_changes(lines: &[Line], ordered: &[LineId]) -> Vec<OrderChange> {
    ordered
        .iter()
        .enumerate()
        .filter_map(|(index, id)| {
            let line = lines.iter().find(|l| l.id == *id)?;
            let order = u32::try_from(index).ok()?;
            (line.order != order).then_some(OrderChange {
                line_id: line.id,
                order,
            })
        })
        .collect()
}

/// Writes that compact the current order indices into `0..n`, keeping the
/// relative order (ties broken by id).
pub fn contiguous_order_changes(lines: &[Line]) -> Vec<OrderChange> {
    let mut current: Vec<(u32, LineId)> = lines.iter().map(|l| (l.order, l.id)).collect();
    current.sort();
    let ordered: Vec<LineId> = current.into_iter().map(|(_, id)| id).collect();
    reorder_changes(lines, &ordered)
}
