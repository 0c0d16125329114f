// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), feature = "alloc"))]
extern crate alloc;

// === Core Modules ===
pub mod core;
pub mod fs;

// Error types
pub use self::core::error::{IsoError, IsoErrorKind, IsoResult};

// Volume API
pub mod iso {
    pub use super::fs::iso::prelude::*;
}

pub use fs::iso::facade::{Iso9660Facade, JolietFacade, RockRidgeFacade, UdfFacade};
pub use fs::iso::image::{AddOpts, ElToritoOpts, IsoImage, IsoPathArg, IsoRecord};
pub use fs::iso::meta::{IsoMeta, IsoOpts};
