// SPDX-License-Identifier: MIT

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::string::{String, ToString};

use crate::core::codec::{is_a_str, is_d_str};
use crate::core::error::*;
use crate::fs::iso::types::susp::RrVersion;

/// Options for initialising an empty volume.
#[derive(Debug, Clone)]
pub struct IsoOpts {
    /// Interchange level 1-4; levels 1-3 enforce strict d-character
    /// names, level 4 relaxes them.
    pub interchange_level: u8,
    pub rock_ridge: Option<RrVersion>,
    /// Joliet UCS-2 level (1-3).
    pub joliet: Option<u8>,
    pub udf: bool,
    pub vol_ident: String,
    pub sys_ident: String,
    pub volset_ident: String,
    pub publisher_ident: String,
    pub preparer_ident: String,
    pub application_ident: String,
}

impl Default for IsoOpts {
    fn default() -> Self {
        Self {
            interchange_level: 1,
            rock_ridge: None,
            joliet: None,
            udf: false,
            vol_ident: "CDROM".to_string(),
            sys_ident: String::new(),
            volset_ident: String::new(),
            publisher_ident: String::new(),
            preparer_ident: String::new(),
            application_ident: "OPALFS".to_string(),
        }
    }
}

impl IsoOpts {
    pub fn new(interchange_level: u8) -> Self {
        Self {
            interchange_level,
            ..Self::default()
        }
    }

    /// Accepts the textual Rock Ridge versions "1.09" and "1.12".
    pub fn rock_ridge(mut self, version: &str) -> Self {
        self.rock_ridge = match version {
            "1.12" => Some(RrVersion::V1_12),
            _ => Some(RrVersion::V1_09),
        };
        self
    }

    pub fn joliet(mut self, level: u8) -> Self {
        self.joliet = Some(level);
        self
    }

    pub fn udf(mut self) -> Self {
        self.udf = true;
        self
    }

    pub fn vol_ident(mut self, ident: &str) -> Self {
        self.vol_ident = ident.to_string();
        self
    }
}

/// Validated volume configuration.
#[derive(Debug, Clone)]
pub struct IsoMeta {
    pub interchange_level: u8,
    pub rock_ridge: Option<RrVersion>,
    pub joliet: Option<u8>,
    pub udf: bool,
    pub vol_ident: String,
    pub sys_ident: String,
    pub volset_ident: String,
    pub publisher_ident: String,
    pub preparer_ident: String,
    pub application_ident: String,
    pub seq_num: u16,
    pub set_size: u16,
}

impl IsoMeta {
    pub fn from_opts(opts: &IsoOpts) -> IsoResult<Self> {
        if !(1..=4).contains(&opts.interchange_level) {
            return Err(IsoError::Invalid("interchange level must be 1-4"));
        }
        if let Some(level) = opts.joliet
            && !(1..=3).contains(&level)
        {
            return Err(IsoError::Invalid("joliet level must be 1-3"));
        }
        if opts.interchange_level < 4 {
            if !is_d_str(opts.vol_ident.as_bytes()) {
                return Err(IsoError::Invalid("volume identifier must be d-characters"));
            }
            if !is_a_str(opts.sys_ident.as_bytes()) {
                return Err(IsoError::Invalid("system identifier must be a-characters"));
            }
        }

        Ok(Self {
            interchange_level: opts.interchange_level,
            rock_ridge: opts.rock_ridge,
            joliet: opts.joliet,
            udf: opts.udf,
            vol_ident: opts.vol_ident.clone(),
            sys_ident: opts.sys_ident.clone(),
            volset_ident: opts.volset_ident.clone(),
            publisher_ident: opts.publisher_ident.clone(),
            preparer_ident: opts.preparer_ident.clone(),
            application_ident: opts.application_ident.clone(),
            seq_num: 1,
            set_size: 1,
        })
    }

    #[inline]
    pub fn has_rock_ridge(&self) -> bool {
        self.rock_ridge.is_some()
    }

    #[inline]
    pub fn has_joliet(&self) -> bool {
        self.joliet.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_opts_validate() {
        let meta = IsoMeta::from_opts(&IsoOpts::default()).unwrap();
        assert_eq!(meta.interchange_level, 1);
        assert!(!meta.has_joliet());
    }

    #[test]
    fn test_bad_levels_rejected() {
        assert!(IsoMeta::from_opts(&IsoOpts::new(0)).is_err());
        assert!(IsoMeta::from_opts(&IsoOpts::new(5)).is_err());
        assert!(IsoMeta::from_opts(&IsoOpts::new(1).joliet(7)).is_err());
    }

    #[test]
    fn test_identifier_alphabets_enforced() {
        let opts = IsoOpts::new(1).vol_ident("bad lower");
        assert!(IsoMeta::from_opts(&opts).is_err());

        let opts = IsoOpts::new(4).vol_ident("bad lower");
        assert!(IsoMeta::from_opts(&opts).is_ok());
    }

    #[test]
    fn test_rock_ridge_versions() {
        let opts = IsoOpts::new(1).rock_ridge("1.12");
        assert_eq!(opts.rock_ridge, Some(RrVersion::V1_12));
        let opts = IsoOpts::new(1).rock_ridge("1.09");
        assert_eq!(opts.rock_ridge, Some(RrVersion::V1_09));
    }
}
