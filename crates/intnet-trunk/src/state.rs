use crate::error::{Result, TrunkError};
use core::sync::atomic::{AtomicU8, Ordering};

/// Activity level of a trunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrunkState {
    Invalid = 0,
    Inactive = 1,
    Active = 2,
    Disconnecting = 3,
}

impl TrunkState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Inactive,
            2 => Self::Active,
            3 => Self::Disconnecting,
            _ => Self::Invalid,
        }
    }

    /// Whether `self -> to` is a legal step. Staying in the same state is not
    /// a step.
    pub fn can_become(self, to: TrunkState) -> bool {
        use TrunkState::*;
        matches!(
            (self, to),
            (Invalid, Inactive)
                | (Inactive, Active)
                | (Active, Inactive)
                | (Inactive, Disconnecting)
                | (Active, Disconnecting)
        )
    }
}

/// Lock-free holder of a [`TrunkState`] that only performs legal transitions.
#[derive(Debug)]
pub struct TrunkStateCell(AtomicU8);

impl TrunkStateCell {
    /// A fresh cell, already moved out of `Invalid`.
    pub fn new() -> Self {
        Self(AtomicU8::new(TrunkState::Inactive as u8))
    }

    pub fn get(&self) -> TrunkState {
        TrunkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_disconnecting(&self) -> bool {
        self.get() == TrunkState::Disconnecting
    }

    /// Moves to `to`, returning the previous state.
    pub fn set(&self, to: TrunkState) -> Result<TrunkState> {
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            let from = TrunkState::from_u8(cur);
            if !from.can_become(to) {
                return Err(TrunkError::InvalidState { from, to });
            }
            match self
                .0
                .compare_exchange_weak(cur, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(from),
                Err(actual) => cur = actual,
            }
        }
    }
}

impl Default for TrunkStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_inactive_cycle_then_disconnect() {
        let cell = TrunkStateCell::new();
        assert_eq!(cell.get(), TrunkState::Inactive);
        for _ in 0..3 {
            assert_eq!(cell.set(TrunkState::Active), Ok(TrunkState::Inactive));
            assert_eq!(cell.set(TrunkState::Inactive), Ok(TrunkState::Active));
        }
        assert_eq!(cell.set(TrunkState::Disconnecting), Ok(TrunkState::Inactive));
        assert!(cell.is_disconnecting());
        for to in [
            TrunkState::Active,
            TrunkState::Inactive,
            TrunkState::Disconnecting,
            TrunkState::Invalid,
        ] {
            assert_eq!(
                cell.set(to),
                Err(TrunkError::InvalidState {
                    from: TrunkState::Disconnecting,
                    to
                })
            );
        }
    }

    #[test]
    fn same_state_is_refused() {
        let cell = TrunkStateCell::new();
        assert_eq!(
            cell.set(TrunkState::Inactive),
            Err(TrunkError::InvalidState {
                from: TrunkState::Inactive,
                to: TrunkState::Inactive
            })
        );
        cell.set(TrunkState::Active).unwrap();
        assert!(cell.set(TrunkState::Active).is_err());
        assert_eq!(cell.get(), TrunkState::Active);
    }

    #[test]
    fn nothing_returns_to_invalid() {
        let cell = TrunkStateCell::new();
        assert!(cell.set(TrunkState::Invalid).is_err());
        cell.set(TrunkState::Active).unwrap();
        assert!(cell.set(TrunkState::Invalid).is_err());
    }
}
