//! Storage backend contract.
//!
//! The session decides what to store and when; the backend decides how. It
//! persists chunks, remembers how far a resumable transfer got, validates the
//! finished image and applies it.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use ota_core::error::BackendError;
use ota_core::wire::HASH_SIZE;

/// Flags passed to `FirmwareBackend::start` and `FirmwareBackend::finish`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UpdateFlags(u8);

impl UpdateFlags {
    /// Drop data kept from an earlier transfer of the same file.
    pub const DISCARD_DATA: UpdateFlags = UpdateFlags(0x01);
    /// No file hash was given; nothing can be resumed later.
    pub const NON_RESUMABLE: UpdateFlags = UpdateFlags(0x02);
    /// Abort the update.
    pub const CANCEL: UpdateFlags = UpdateFlags(0x04);
    /// Check the received image without applying it.
    pub const VALIDATE_ONLY: UpdateFlags = UpdateFlags(0x08);

    pub const fn empty() -> Self {
        UpdateFlags(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: UpdateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateFlags {
    type Output = UpdateFlags;

    fn bitor(self, rhs: UpdateFlags) -> UpdateFlags {
        UpdateFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: UpdateFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for UpdateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(UpdateFlags, &str); 4] = [
            (UpdateFlags::DISCARD_DATA, "DISCARD_DATA"),
            (UpdateFlags::NON_RESUMABLE, "NON_RESUMABLE"),
            (UpdateFlags::CANCEL, "CANCEL"),
            (UpdateFlags::VALIDATE_ONLY, "VALIDATE_ONLY"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("UpdateFlags(empty)")
        } else {
            write!(f, "UpdateFlags({})", set.join(" | "))
        }
    }
}

/// Storage side of a firmware update. Calls are synchronous and may be slow.
pub trait FirmwareBackend {
    /// Prepare for a file of `file_size` bytes.
    ///
    /// Returns how many bytes from the start of the file are already stored
    /// and need not be transferred again (0 for a fresh transfer).
    fn start(
        &mut self,
        file_size: usize,
        file_hash: Option<&[u8; HASH_SIZE]>,
        flags: UpdateFlags,
    ) -> Result<usize, BackendError>;

    /// Persist `data` at absolute `offset`. Every byte below
    /// `contiguous_offset` has now been handed over and is safe to resume from.
    fn save_chunk(
        &mut self,
        data: &[u8],
        offset: usize,
        contiguous_offset: usize,
    ) -> Result<(), BackendError>;

    /// Validate, apply or cancel the update depending on `flags`.
    /// Empty flags apply the image.
    fn finish(&mut self, flags: UpdateFlags) -> Result<(), BackendError>;
}
