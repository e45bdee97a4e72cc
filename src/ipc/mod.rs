//! Wire protocol between the bridge and the chroot-side daemon.

pub mod codec;
pub mod protocol;
