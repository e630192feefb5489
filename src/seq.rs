use core::{cmp, fmt, ops};

/// A TCP sequence (or acknowledgement) number.
///
/// Ordering is defined modulo 2^32: `a < b` when `b` lies less than half the
/// sequence space ahead of `a`. Two numbers exactly half the space apart are
/// ordered by their raw values.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = i32;

    fn sub(self, rhs: SeqNumber) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        match *self - *other {
            i32::MIN => Some(self.0.cmp(&other.0)),
            diff => Some(diff.cmp(&0)),
        }
    }
}

/// TCP timestamp values wrap the same way sequence numbers do (RFC 7323).
pub fn tstmp_lt(a: u32, b: u32) -> bool {
    SeqNumber(a) < SeqNumber(b)
}
