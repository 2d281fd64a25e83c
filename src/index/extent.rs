//! Extent lists: the interface every index operator composes from.
//!
//! An extent is a `(start, end)` region of the corpus; posting lists are
//! extent lists whose extents are single positions. The four positional
//! primitives plus `length`/`count`/`get_nth`/`next_n` are the complete
//! query-side surface of a list. Hot list shapes are dispatched through the
//! `ExtentList` enum; open-ended compositions fall back to boxed dispatch.

use super::segmented::SegmentedPostingList;
use crate::core::types::Posting;

pub trait ExtentSource: Send {
    /// Leftmost extent whose start is >= position.
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)>;
    /// Leftmost extent whose end is >= position.
    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)>;
    /// Rightmost extent whose start is <= position.
    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)>;
    /// Rightmost extent whose end is <= position.
    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)>;

    fn length(&mut self) -> u64;

    /// Number of extents fully inside [start, end].
    fn count(&mut self, start: Posting, end: Posting) -> u64 {
        let mut n = 0;
        let mut from = start;
        while let Some((s, e)) = self.first_start_bigger_eq(from) {
            if e > end {
                break;
            }
            n += 1;
            from = s + 1;
        }
        n
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)>;

    /// Fill `starts`/`ends` with up to `n` extents from [from, to]. Returns
    /// the number produced.
    fn next_n(
        &mut self,
        from: Posting,
        to: Posting,
        n: usize,
        starts: &mut [Posting],
        ends: &mut [Posting],
    ) -> usize {
        let mut produced = 0;
        let mut cursor = from;
        while produced < n {
            match self.first_start_bigger_eq(cursor) {
                Some((s, e)) if e <= to => {
                    starts[produced] = s;
                    ends[produced] = e;
                    produced += 1;
                    cursor = s + 1;
                }
                _ => break,
            }
        }
        produced
    }
}

/// Exponential search outward from `hint`, then binary search: index of the
/// first element >= target. `None` if every element is smaller.
pub(crate) fn first_bigger_eq(postings: &[Posting], hint: usize, target: Posting) -> Option<usize> {
    let count = postings.len();
    if count == 0 || postings[count - 1] < target {
        return None;
    }
    if target <= postings[0] {
        return Some(0);
    }
    let hint = hint.min(count - 1);
    let (mut lower, mut upper);
    let mut delta = 1usize;
    if postings[hint] >= target {
        // gallop left until we pass below the target
        while hint >= delta && postings[hint - delta] >= target {
            delta <<= 1;
        }
        lower = hint.saturating_sub(delta);
        upper = hint;
    } else {
        // gallop right
        while hint + delta < count && postings[hint + delta] < target {
            delta <<= 1;
        }
        lower = hint;
        upper = (hint + delta).min(count - 1);
    }
    while upper > lower {
        let middle = (upper + lower) / 2;
        if postings[middle] < target {
            lower = middle + 1;
        } else {
            upper = middle;
        }
    }
    Some(lower)
}

/// Index of the last element <= target; `None` if every element is bigger.
pub(crate) fn last_smaller_eq(postings: &[Posting], hint: usize, target: Posting) -> Option<usize> {
    let count = postings.len();
    if count == 0 || postings[0] > target {
        return None;
    }
    if target >= postings[count - 1] {
        return Some(count - 1);
    }
    let hint = hint.min(count - 1);
    let (mut lower, mut upper);
    let mut delta = 1usize;
    if postings[hint] > target {
        while hint >= delta && postings[hint - delta] > target {
            delta <<= 1;
        }
        lower = hint.saturating_sub(delta);
        upper = hint;
    } else {
        while hint + delta < count && postings[hint + delta] <= target {
            delta <<= 1;
        }
        lower = hint;
        upper = (hint + delta).min(count - 1);
    }
    while upper > lower {
        let middle = (upper + lower + 1) / 2;
        if postings[middle] > target {
            upper = middle - 1;
        } else {
            lower = middle;
        }
    }
    Some(lower)
}

/// A fully decoded posting list. Extents are single positions.
pub struct InMemoryPostingList {
    postings: Vec<Posting>,
    position: usize,
}

impl InMemoryPostingList {
    pub fn new(postings: Vec<Posting>) -> InMemoryPostingList {
        debug_assert!(postings.windows(2).all(|w| w[0] < w[1]));
        InMemoryPostingList { postings, position: 0 }
    }

    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }
}

impl ExtentSource for InMemoryPostingList {
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let index = first_bigger_eq(&self.postings, self.position, position)?;
        self.position = index;
        let p = self.postings[index];
        Some((p, p))
    }

    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.first_start_bigger_eq(position)
    }

    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let index = last_smaller_eq(&self.postings, self.position, position)?;
        self.position = index;
        let p = self.postings[index];
        Some((p, p))
    }

    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.last_start_smaller_eq(position)
    }

    fn length(&mut self) -> u64 {
        self.postings.len() as u64
    }

    fn count(&mut self, start: Posting, end: Posting) -> u64 {
        let Some(lo) = first_bigger_eq(&self.postings, self.position, start) else {
            return 0;
        };
        let Some(hi) = last_smaller_eq(&self.postings, self.position, end) else {
            return 0;
        };
        if hi < lo { 0 } else { (hi - lo + 1) as u64 }
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)> {
        let p = *self.postings.get(n as usize)?;
        Some((p, p))
    }
}

/// Union of child lists, in extent order. Used for wildcard and stem
/// expansions and for combining the in-memory partition with disk indices.
pub struct OrList {
    children: Vec<ExtentList>,
    cached_length: Option<u64>,
}

impl ExtentSource for OrList {
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut best: Option<(Posting, Posting)> = None;
        for child in self.children.iter_mut() {
            if let Some(extent) = child.first_start_bigger_eq(position) {
                if best.is_none_or(|b| extent < b) {
                    best = Some(extent);
                }
            }
        }
        best
    }

    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut best: Option<(Posting, Posting)> = None;
        for child in self.children.iter_mut() {
            if let Some((s, e)) = child.first_end_bigger_eq(position) {
                if best.is_none_or(|(bs, be)| (e, s) < (be, bs)) {
                    best = Some((s, e));
                }
            }
        }
        best
    }

    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut best: Option<(Posting, Posting)> = None;
        for child in self.children.iter_mut() {
            if let Some(extent) = child.last_start_smaller_eq(position) {
                if best.is_none_or(|b| extent > b) {
                    best = Some(extent);
                }
            }
        }
        best
    }

    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut best: Option<(Posting, Posting)> = None;
        for child in self.children.iter_mut() {
            if let Some((s, e)) = child.last_end_smaller_eq(position) {
                if best.is_none_or(|(bs, be)| (e, s) > (be, bs)) {
                    best = Some((s, e));
                }
            }
        }
        best
    }

    fn length(&mut self) -> u64 {
        if let Some(len) = self.cached_length {
            return len;
        }
        // children may overlap, so walk the union once
        let mut len = 0u64;
        let mut cursor = 0;
        while let Some((s, _)) = self.first_start_bigger_eq(cursor) {
            len += 1;
            if s == Posting::MAX {
                break;
            }
            cursor = s + 1;
        }
        self.cached_length = Some(len);
        len
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)> {
        let mut cursor = 0;
        let mut seen = 0u64;
        while let Some((s, e)) = self.first_start_bigger_eq(cursor) {
            if seen == n {
                return Some((s, e));
            }
            seen += 1;
            cursor = s + 1;
        }
        None
    }
}

/// Intersection on raw positions. Document-level conjunction lives in the
/// query executor, which must ignore the tf bits; this list is for
/// schema-independent lists only.
pub struct AndList {
    children: Vec<ExtentList>,
}

impl ExtentSource for AndList {
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut candidate = self.children.first_mut()?.first_start_bigger_eq(position)?.0;
        'outer: loop {
            for child in self.children.iter_mut() {
                let (s, _) = child.first_start_bigger_eq(candidate)?;
                if s > candidate {
                    candidate = s;
                    continue 'outer;
                }
            }
            return Some((candidate, candidate));
        }
    }

    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.first_start_bigger_eq(position)
    }

    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        let mut candidate = self.children.first_mut()?.last_start_smaller_eq(position)?.0;
        'outer: loop {
            for child in self.children.iter_mut() {
                let (s, _) = child.last_start_smaller_eq(candidate)?;
                if s < candidate {
                    candidate = s;
                    continue 'outer;
                }
            }
            return Some((candidate, candidate));
        }
    }

    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.last_start_smaller_eq(position)
    }

    fn length(&mut self) -> u64 {
        let mut len = 0u64;
        let mut cursor = 0;
        while let Some((s, _)) = self.first_start_bigger_eq(cursor) {
            len += 1;
            if s == Posting::MAX {
                break;
            }
            cursor = s + 1;
        }
        len
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)> {
        let mut cursor = 0;
        let mut seen = 0u64;
        while let Some((s, e)) = self.first_start_bigger_eq(cursor) {
            if seen == n {
                return Some((s, e));
            }
            seen += 1;
            cursor = s + 1;
        }
        None
    }
}

/// The concrete list shapes. Hot paths dispatch monomorphically through the
/// tag; `Dyn` is the escape hatch for open-ended compositions.
pub enum ExtentList {
    Empty,
    InMemory(InMemoryPostingList),
    Segmented(SegmentedPostingList),
    Or(OrList),
    And(AndList),
    Dyn(Box<dyn ExtentSource>),
}

impl ExtentList {
    pub fn from_postings(postings: Vec<Posting>) -> ExtentList {
        if postings.is_empty() {
            ExtentList::Empty
        } else {
            ExtentList::InMemory(InMemoryPostingList::new(postings))
        }
    }

    pub fn or(children: Vec<ExtentList>) -> ExtentList {
        let mut children: Vec<ExtentList> =
            children.into_iter().filter(|c| !matches!(c, ExtentList::Empty)).collect();
        match children.len() {
            0 => ExtentList::Empty,
            1 => children.pop().unwrap(),
            _ => ExtentList::Or(OrList { children, cached_length: None }),
        }
    }

    pub fn and(children: Vec<ExtentList>) -> ExtentList {
        if children.is_empty() || children.iter().any(|c| matches!(c, ExtentList::Empty)) {
            return ExtentList::Empty;
        }
        ExtentList::And(AndList { children })
    }

    /// Decode the entire list. Mainly for merging and tests.
    pub fn to_vec(&mut self) -> Vec<Posting> {
        match self {
            ExtentList::Empty => Vec::new(),
            ExtentList::InMemory(list) => list.postings().to_vec(),
            ExtentList::Segmented(list) => list.to_vec(),
            other => {
                let mut postings = Vec::new();
                let mut cursor = 0;
                while let Some((s, _)) = other.first_start_bigger_eq(cursor) {
                    postings.push(s);
                    if s == Posting::MAX {
                        break;
                    }
                    cursor = s + 1;
                }
                postings
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $list:ident => $body:expr, $empty:expr) => {
        match $self {
            ExtentList::Empty => $empty,
            ExtentList::InMemory($list) => $body,
            ExtentList::Segmented($list) => $body,
            ExtentList::Or($list) => $body,
            ExtentList::And($list) => $body,
            ExtentList::Dyn($list) => $body,
        }
    };
}

impl ExtentSource for ExtentList {
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        dispatch!(self, list => list.first_start_bigger_eq(position), None)
    }

    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        dispatch!(self, list => list.first_end_bigger_eq(position), None)
    }

    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        dispatch!(self, list => list.last_start_smaller_eq(position), None)
    }

    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        dispatch!(self, list => list.last_end_smaller_eq(position), None)
    }

    fn length(&mut self) -> u64 {
        dispatch!(self, list => list.length(), 0)
    }

    fn count(&mut self, start: Posting, end: Posting) -> u64 {
        dispatch!(self, list => list.count(start, end), 0)
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)> {
        dispatch!(self, list => list.get_nth(n), None)
    }

    fn next_n(
        &mut self,
        from: Posting,
        to: Posting,
        n: usize,
        starts: &mut [Posting],
        ends: &mut [Posting],
    ) -> usize {
        dispatch!(self, list => list.next_n(from, to, n, starts, ends), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_first_bigger_eq(postings: &[u64], target: u64) -> Option<u64> {
        postings.iter().copied().find(|&p| p >= target)
    }

    fn linear_last_smaller_eq(postings: &[u64], target: u64) -> Option<u64> {
        postings.iter().copied().filter(|&p| p <= target).last()
    }

    #[test]
    fn positional_primitives_match_linear_scan() {
        let postings: Vec<u64> = vec![2, 3, 10, 11, 12, 40, 900, 901, 5000];
        let mut list = InMemoryPostingList::new(postings.clone());
        for target in 0..5100u64 {
            assert_eq!(
                list.first_start_bigger_eq(target).map(|(s, _)| s),
                linear_first_bigger_eq(&postings, target),
                "first >= {}",
                target
            );
            assert_eq!(
                list.last_start_smaller_eq(target).map(|(s, _)| s),
                linear_last_smaller_eq(&postings, target),
                "last <= {}",
                target
            );
        }
    }

    #[test]
    fn round_trip_of_symmetric_primitives() {
        let postings: Vec<u64> = (0..1000u64).map(|i| i * 7 + 3).collect();
        let mut list = InMemoryPostingList::new(postings);
        for p in [0u64, 3, 500, 6999, 7000] {
            if let Some((_, e)) = list.first_end_bigger_eq(p) {
                let (_, e2) = list.last_end_smaller_eq(e).unwrap();
                assert_eq!(e2, e);
            }
        }
    }

    #[test]
    fn count_matches_filter() {
        let postings: Vec<u64> = vec![5, 6, 7, 100, 200, 201, 202, 203];
        let mut list = InMemoryPostingList::new(postings.clone());
        for (start, end) in [(0u64, 1000u64), (6, 201), (8, 99), (100, 100), (204, 300)] {
            let expected = postings.iter().filter(|&&p| p >= start && p <= end).count() as u64;
            assert_eq!(list.count(start, end), expected, "[{}, {}]", start, end);
        }
    }

    #[test]
    fn or_merges_in_order() {
        let a = ExtentList::from_postings(vec![1, 5, 9]);
        let b = ExtentList::from_postings(vec![2, 5, 20]);
        let mut or = ExtentList::or(vec![a, b]);
        let merged = or.to_vec();
        assert_eq!(merged, vec![1, 2, 5, 9, 20]);
        assert_eq!(or.length(), 5);
    }

    #[test]
    fn and_intersects_positions() {
        let a = ExtentList::from_postings(vec![1, 5, 9, 20]);
        let b = ExtentList::from_postings(vec![5, 9, 21]);
        let mut and = ExtentList::and(vec![a, b]);
        assert_eq!(and.to_vec(), vec![5, 9]);
    }

    #[test]
    fn next_n_respects_bounds() {
        let mut list = ExtentList::from_postings((0..100u64).map(|i| i * 2).collect());
        let mut starts = [0u64; 10];
        let mut ends = [0u64; 10];
        let n = list.next_n(5, 21, 10, &mut starts, &mut ends);
        assert_eq!(&starts[..n], &[6, 8, 10, 12, 14, 16, 18, 20]);
    }
}
