/// Thresholds derived from the number of known participants.
///
/// All thresholds are compared with a strict "greater than": a tally
/// reaches a quorum when `count > threshold`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quorum {
    n: usize,
}

impl Quorum {
    pub fn new(n: usize) -> Self {
        Quorum { n }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Maximum number of Byzantine participants tolerated: the largest
    /// integer strictly below `n / 3`.
    pub fn f(&self) -> usize {
        self.n.saturating_sub(1) / 3
    }

    /// Weak messages needed to strong-accept: `(n + f) / 2`.
    pub fn strong(&self) -> usize {
        (self.n + self.f()) / 2
    }

    /// Weak messages needed to decide without strong acceptance: `(n + 3f) / 2`.
    pub fn decide_weak(&self) -> usize {
        (self.n + 3 * self.f()) / 2
    }

    /// Strong messages needed to decide: `2f`.
    pub fn decide_strong(&self) -> usize {
        2 * self.f()
    }

    /// `ceil(2n / 3)`.
    pub fn two_thirds(&self) -> usize {
        (2 * self.n).div_ceil(3)
    }

    /// More than `f` reports: at least one came from a correct participant.
    pub fn exceeds_faulty(&self, count: usize) -> bool {
        count > self.f()
    }

    /// More than `2f` reports: at least `f + 1` came from correct participants.
    pub fn exceeds_twice_faulty(&self, count: usize) -> bool {
        count > 2 * self.f()
    }
}
