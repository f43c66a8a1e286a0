mod spin_lock;

pub use spin_lock::{SpinLockPure, SpinLockPureGuard};
