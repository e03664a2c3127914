use crate::dupes::read_end::ReadEnd;
use crate::errors::Result;

/// Grouping granularity: pairs also compare the second end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Fragments,
    Pairs,
}

/// Streams a sorted read-end iterator and emits maximal runs of
/// positionally identical records.
///
/// Exactly one group is buffered at a time; groups of size 1 are emitted
/// too (they simply carry no duplicates).
pub struct PositionalGrouper<I>
where
    I: Iterator<Item = Result<ReadEnd>>,
{
    source: I,
    by: GroupBy,
    pending: Option<ReadEnd>,
    done: bool,
}

impl<I> PositionalGrouper<I>
where
    I: Iterator<Item = Result<ReadEnd>>,
{
    pub fn new(source: I, by: GroupBy) -> Self {
        PositionalGrouper {
            source,
            by,
            pending: None,
            done: false,
        }
    }

    fn same_position(&self, a: &ReadEnd, b: &ReadEnd) -> bool {
        match self.by {
            GroupBy::Fragments => a.same_fragment_position(b),
            GroupBy::Pairs => a.same_pair_position(b),
        }
    }
}

impl<I> Iterator for PositionalGrouper<I>
where
    I: Iterator<Item = Result<ReadEnd>>,
{
    type Item = Result<Vec<ReadEnd>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let first = match self.pending.take() {
            Some(rec) => rec,
            None => match self.source.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(rec)) => rec,
            },
        };

        let mut group = vec![first];
        loop {
            match self.source.next() {
                None => {
                    self.done = true;
                    break;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(rec)) => {
                    if self.same_position(&group[0], &rec) {
                        group.push(rec);
                    } else {
                        self.pending = Some(rec);
                        break;
                    }
                }
            }
        }
        Some(Ok(group))
    }
}
