/// Half-open interval with a source count and an additive value weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CovInterval {
    pub lo: i32,
    pub hi: i32,
    pub count: i32,
    pub value: i32,
}

#[derive(Clone, Debug, Default)]
pub struct IntervalList {
    list: Vec<CovInterval>,
    is_sorted: bool,
    is_merged: bool,
}

#[derive(Clone, Copy)]
struct DepthEvent {
    pos: i32,
    change: i32,
    open: bool,
}

impl IntervalList {
    pub fn new() -> IntervalList {
        IntervalList::default()
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.is_sorted = false;
        self.is_merged = false;
    }

    pub fn add(&mut self, position: i32, length: i32, value: i32) {
        self.list.push(CovInterval { lo: position, hi: position + length, count: 1, value });
        self.is_sorted = false;
        self.is_merged = false;
    }

    pub fn intervals(&self) -> &[CovInterval] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn sort(&mut self) {
        if !self.is_sorted {
            self.list.sort_by(|a, b| (a.lo, a.hi).cmp(&(b.lo, b.hi)));
        }
        self.is_sorted = true;
    }

    /// Coalesces intervals that are contained in, or reach within
    /// `min_ovlp` of, their left neighbor; counts and values sum on merge.
    /// Idempotent.
    pub fn merge(&mut self, min_ovlp: i32) {
        if self.is_merged {
            return;
        }
        self.sort();
        let mut merged: Vec<CovInterval> = Vec::with_capacity(self.list.len());
        for iv in self.list.drain(..) {
            if let Some(last) = merged.last_mut() {
                let contained = last.lo <= iv.lo && iv.hi <= last.hi;
                let overlaps = last.hi - min_ovlp >= iv.lo;
                if contained || overlaps {
                    if last.hi < iv.hi {
                        last.hi = iv.hi;
                    }
                    last.count += iv.count;
                    last.value += iv.value;
                    continue;
                }
            }
            merged.push(iv);
        }
        self.list = merged;
        self.is_merged = true;
    }

    /// Piecewise-constant depth of `src`: at each point, `count` holds how
    /// many intervals cover it and `value` the sum of their weights. The
    /// result is sorted and merged, with equal adjacent depths coalesced.
    pub fn depth_from(src: &IntervalList) -> IntervalList {
        let mut events = Vec::with_capacity(src.list.len() * 2);
        for iv in &src.list {
            events.push(DepthEvent { pos: iv.lo, change: iv.value, open: true });
            events.push(DepthEvent { pos: iv.hi, change: iv.value, open: false });
        }
        let mut out = IntervalList::new();
        out.list = compute_depth(&mut events);
        out.is_sorted = true;
        out.is_merged = true;
        out
    }

    /// Replaces the list with its complement inside `[invlo, invhi)`.
    pub fn invert(&mut self, invlo: i32, invhi: i32) {
        self.merge(0);
        let mut inv: Vec<CovInterval> = Vec::with_capacity(self.list.len() + 2);
        let gap = |lo: i32, hi: i32| CovInterval { lo, hi, count: 1, value: 0 };
        if self.list.is_empty() {
            inv.push(gap(invlo, invhi));
        } else {
            if invlo < self.list[0].lo {
                inv.push(gap(invlo, self.list[0].lo));
            }
            for w in self.list.windows(2) {
                if w[0].hi < w[1].lo {
                    inv.push(gap(w[0].hi, w[1].lo));
                }
            }
            let last = self.list[self.list.len() - 1];
            if last.hi < invhi {
                inv.push(gap(last.hi, invhi));
            }
        }
        self.list = inv;
        self.is_sorted = true;
        self.is_merged = false;
    }
}

fn compute_depth(events: &mut [DepthEvent]) -> Vec<CovInterval> {
    if events.is_empty() {
        return Vec::new();
    }
    // opens sort before closes at the same position
    events.sort_by(|a, b| a.pos.cmp(&b.pos).then(b.open.cmp(&a.open)));
    debug_assert!(events[0].open);
    let mut list: Vec<CovInterval> = Vec::with_capacity(events.len());
    list.push(CovInterval { lo: events[0].pos, hi: events[0].pos, count: 1, value: events[0].change });
    let mut len = 0usize;
    for i in 1..events.len() {
        let e = events[i];
        list[len].hi = e.pos;
        let (nct, nva) = if e.open {
            (list[len].count + 1, list[len].value + e.change)
        } else {
            (list[len].count - 1, list[len].value - e.change)
        };
        let mut split = events[i - 1].pos != e.pos || list[len].value != nva;
        if split {
            split = list[len].lo != list[len].hi;
        }
        if split {
            let prev = list[len];
            len += 1;
            let seg = CovInterval { lo: e.pos, hi: e.pos, count: prev.count, value: prev.value };
            if len == list.len() {
                list.push(seg);
            } else {
                list[len] = seg;
            }
        }
        list[len].hi = e.pos;
        list[len].count = nct;
        list[len].value = nva;
        if len > 1
            && list[len - 1].hi == list[len].lo
            && list[len - 1].count == list[len].count
            && list[len - 1].value == list[len].value
        {
            list[len - 1].hi = list[len].hi;
            len -= 1;
        }
    }
    // the running segment is the closed-out zero-depth stub; drop it
    list.truncate(len);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(intervals: &[(i32, i32)]) -> IntervalList {
        let mut list = IntervalList::new();
        for &(lo, hi) in intervals {
            list.add(lo, hi - lo, 0);
        }
        list
    }

    #[test]
    fn merge_overlapping_and_disjoint() {
        let mut list = make(&[(0, 10), (5, 15), (20, 25)]);
        list.merge(0);
        assert_eq!(
            list.intervals(),
            &[
                CovInterval { lo: 0, hi: 15, count: 2, value: 0 },
                CovInterval { lo: 20, hi: 25, count: 1, value: 0 },
            ]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = make(&[(3, 9), (0, 10), (5, 15), (20, 25), (24, 30)]);
        a.merge(0);
        let once = a.intervals().to_vec();
        a.merge(0);
        assert_eq!(a.intervals(), &once[..]);

        let mut b = make(&[(3, 9), (0, 10), (5, 15), (20, 25), (24, 30)]);
        b.merge(0);
        b.is_merged = false;
        b.merge(0);
        assert_eq!(b.intervals(), &once[..]);
    }

    #[test]
    fn merge_respects_min_ovlp() {
        // reaching within min_ovlp of the neighbor counts as overlap
        let mut list = make(&[(0, 10), (12, 20)]);
        list.merge(2);
        assert_eq!(list.len(), 1);
        let mut apart = make(&[(0, 10), (13, 20)]);
        apart.merge(2);
        assert_eq!(apart.len(), 2);
    }

    #[test]
    fn depth_counts_cover() {
        let mut list = IntervalList::new();
        list.add(0, 10, 1);
        list.add(5, 10, 1);
        let depth = IntervalList::depth_from(&list);
        assert_eq!(
            depth.intervals(),
            &[
                CovInterval { lo: 0, hi: 5, count: 1, value: 1 },
                CovInterval { lo: 5, hi: 10, count: 2, value: 2 },
                CovInterval { lo: 10, hi: 15, count: 1, value: 1 },
            ]
        );
    }

    #[test]
    fn depth_coalesces_equal_neighbors() {
        // [5,10) and [10,15) both sit at depth 2 and fuse into one segment
        let mut list = IntervalList::new();
        list.add(0, 10, 1);
        list.add(5, 5, 1);
        list.add(10, 5, 1);
        list.add(10, 5, 1);
        let depth = IntervalList::depth_from(&list);
        assert_eq!(
            depth.intervals(),
            &[
                CovInterval { lo: 0, hi: 5, count: 1, value: 1 },
                CovInterval { lo: 5, hi: 15, count: 2, value: 2 },
            ]
        );
    }

    #[test]
    fn invert_complements_within_bounds() {
        let mut list = make(&[(10, 20), (30, 40)]);
        list.invert(0, 50);
        assert_eq!(
            list.intervals().iter().map(|iv| (iv.lo, iv.hi)).collect::<Vec<_>>(),
            vec![(0, 10), (20, 30), (40, 50)]
        );
    }

    #[test]
    fn invert_twice_equals_merge() {
        let mut a = make(&[(10, 20), (15, 25), (30, 40)]);
        a.invert(0, 50);
        a.invert(0, 50);
        let mut b = make(&[(10, 20), (15, 25), (30, 40)]);
        b.merge(0);
        assert_eq!(
            a.intervals().iter().map(|iv| (iv.lo, iv.hi)).collect::<Vec<_>>(),
            b.intervals().iter().map(|iv| (iv.lo, iv.hi)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn invert_of_empty_is_the_bounds() {
        let mut list = IntervalList::new();
        list.invert(5, 25);
        assert_eq!(list.intervals(), &[CovInterval { lo: 5, hi: 25, count: 1, value: 0 }]);
    }
}
