// SPDX-License-Identifier: MIT

//! Namespace facades.
//!
//! Each facade scopes every call to a single namespace, deriving the
//! identifiers the full API would demand for the others. They are
//! thin borrows over [`IsoImage`]; drop the facade to get the full
//! surface back.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::core::error::*;
use crate::core::utils::path_utils::split_path;
use crate::fs::iso::image::{AddOpts, IsoImage, IsoPathArg, IsoRecord};
use crate::fs::iso::utils::mangle_iso_name;

/// Builds the primary-hierarchy path that mirrors a facade path.
fn mangle_path(path: &str, level: u8, last_is_dir: bool) -> String {
    let comps = split_path(path);
    let mut out = String::new();
    for (i, comp) in comps.iter().enumerate() {
        let is_dir = last_is_dir || i + 1 < comps.len();
        out.push('/');
        out.push_str(&mangle_iso_name(comp, level, is_dir));
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn last_component(path: &str) -> String {
    split_path(path).last().copied().unwrap_or("").to_string()
}

/// Drops the `;N` version suffixes so a primary-hierarchy path can
/// name the same entries in the other namespaces.
fn strip_versions(path: &str) -> String {
    let mut out = String::new();
    for comp in split_path(path) {
        out.push('/');
        out.push_str(comp.split(';').next().unwrap_or(comp));
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

pub struct Iso9660Facade<'a> {
    image: &'a mut IsoImage,
}

impl Iso9660Facade<'_> {
    pub fn add_bytes(&mut self, data: Vec<u8>, iso_path: &str) -> IsoResult<()> {
        let name = strip_versions(&last_component(iso_path));
        let name = name.trim_start_matches('/');
        let rr = self.image.meta().has_rock_ridge();
        let joliet = self.image.meta().has_joliet();
        let joliet_path = joliet.then(|| strip_versions(iso_path));
        self.image.add_bytes(
            data,
            &AddOpts {
                iso_path: Some(iso_path),
                rr_name: rr.then_some(name),
                joliet_path: joliet_path.as_deref(),
                ..AddOpts::default()
            },
        )
    }

    pub fn add_directory(&mut self, iso_path: &str) -> IsoResult<()> {
        let name = last_component(iso_path);
        let rr = self.image.meta().has_rock_ridge();
        let joliet = self.image.meta().has_joliet();
        let joliet_path = joliet.then(|| strip_versions(iso_path));
        self.image.add_directory(&AddOpts {
            iso_path: Some(iso_path),
            rr_name: rr.then_some(name.as_str()),
            joliet_path: joliet_path.as_deref(),
            ..AddOpts::default()
        })
    }

    pub fn rm_file(&mut self, iso_path: &str) -> IsoResult<()> {
        self.image.rm_file(IsoPathArg::IsoPath(iso_path))
    }

    pub fn rm_directory(&mut self, iso_path: &str) -> IsoResult<()> {
        self.image.rm_directory(IsoPathArg::IsoPath(iso_path))
    }

    pub fn get_record(&mut self, iso_path: &str) -> IsoResult<IsoRecord> {
        self.image.get_record(IsoPathArg::IsoPath(iso_path))
    }

    pub fn list_children(&mut self, iso_path: &str) -> IsoResult<Vec<IsoRecord>> {
        self.image.list_children(IsoPathArg::IsoPath(iso_path))
    }

    pub fn walk(&mut self, iso_path: &str) -> IsoResult<Vec<(String, Vec<String>, Vec<String>)>> {
        self.image.walk(IsoPathArg::IsoPath(iso_path))
    }

    pub fn read_file(&mut self, iso_path: &str) -> IsoResult<Vec<u8>> {
        self.image.read_file(IsoPathArg::IsoPath(iso_path))
    }
}

pub struct JolietFacade<'a> {
    image: &'a mut IsoImage,
}

impl JolietFacade<'_> {
    pub fn add_bytes(&mut self, data: Vec<u8>, joliet_path: &str) -> IsoResult<()> {
        let level = self.image.meta().interchange_level;
        let iso_path = mangle_path(joliet_path, level, false);
        let rr = self.image.meta().has_rock_ridge();
        let name = last_component(joliet_path);
        self.image.add_bytes(
            data,
            &AddOpts {
                iso_path: Some(&iso_path),
                rr_name: rr.then_some(name.as_str()),
                joliet_path: Some(joliet_path),
                ..AddOpts::default()
            },
        )
    }

    pub fn add_directory(&mut self, joliet_path: &str) -> IsoResult<()> {
        let level = self.image.meta().interchange_level;
        let iso_path = mangle_path(joliet_path, level, true);
        let rr = self.image.meta().has_rock_ridge();
        let name = last_component(joliet_path);
        self.image.add_directory(&AddOpts {
            iso_path: Some(&iso_path),
            rr_name: rr.then_some(name.as_str()),
            joliet_path: Some(joliet_path),
            ..AddOpts::default()
        })
    }

    pub fn rm_file(&mut self, joliet_path: &str) -> IsoResult<()> {
        self.image.rm_file(IsoPathArg::Joliet(joliet_path))
    }

    pub fn rm_directory(&mut self, joliet_path: &str) -> IsoResult<()> {
        self.image.rm_directory(IsoPathArg::Joliet(joliet_path))
    }

    pub fn get_record(&mut self, joliet_path: &str) -> IsoResult<IsoRecord> {
        self.image.get_record(IsoPathArg::Joliet(joliet_path))
    }

    pub fn list_children(&mut self, joliet_path: &str) -> IsoResult<Vec<IsoRecord>> {
        self.image.list_children(IsoPathArg::Joliet(joliet_path))
    }

    pub fn walk(
        &mut self,
        joliet_path: &str,
    ) -> IsoResult<Vec<(String, Vec<String>, Vec<String>)>> {
        self.image.walk(IsoPathArg::Joliet(joliet_path))
    }

    pub fn read_file(&mut self, joliet_path: &str) -> IsoResult<Vec<u8>> {
        self.image.read_file(IsoPathArg::Joliet(joliet_path))
    }
}

pub struct RockRidgeFacade<'a> {
    image: &'a mut IsoImage,
}

impl RockRidgeFacade<'_> {
    pub fn add_bytes(&mut self, data: Vec<u8>, rr_path: &str, file_mode: u32) -> IsoResult<()> {
        let level = self.image.meta().interchange_level;
        let iso_path = mangle_path(rr_path, level, false);
        let joliet = self.image.meta().has_joliet();
        let joliet_path = joliet.then(|| rr_path.to_string());
        let name = last_component(rr_path);
        self.image.add_bytes(
            data,
            &AddOpts {
                iso_path: Some(&iso_path),
                rr_name: Some(name.as_str()),
                joliet_path: joliet_path.as_deref(),
                file_mode: Some(file_mode),
                ..AddOpts::default()
            },
        )
    }

    pub fn add_directory(&mut self, rr_path: &str, file_mode: u32) -> IsoResult<()> {
        let level = self.image.meta().interchange_level;
        let iso_path = mangle_path(rr_path, level, true);
        let joliet = self.image.meta().has_joliet();
        let joliet_path = joliet.then(|| rr_path.to_string());
        let name = last_component(rr_path);
        self.image.add_directory(&AddOpts {
            iso_path: Some(&iso_path),
            rr_name: Some(name.as_str()),
            joliet_path: joliet_path.as_deref(),
            file_mode: Some(file_mode),
            ..AddOpts::default()
        })
    }

    pub fn rm_file(&mut self, rr_path: &str) -> IsoResult<()> {
        self.image.rm_file(IsoPathArg::RockRidge(rr_path))
    }

    pub fn rm_directory(&mut self, rr_path: &str) -> IsoResult<()> {
        self.image.rm_directory(IsoPathArg::RockRidge(rr_path))
    }

    pub fn get_record(&mut self, rr_path: &str) -> IsoResult<IsoRecord> {
        self.image.get_record(IsoPathArg::RockRidge(rr_path))
    }

    pub fn list_children(&mut self, rr_path: &str) -> IsoResult<Vec<IsoRecord>> {
        self.image.list_children(IsoPathArg::RockRidge(rr_path))
    }

    pub fn walk(&mut self, rr_path: &str) -> IsoResult<Vec<(String, Vec<String>, Vec<String>)>> {
        self.image.walk(IsoPathArg::RockRidge(rr_path))
    }

    pub fn read_file(&mut self, rr_path: &str) -> IsoResult<Vec<u8>> {
        self.image.read_file(IsoPathArg::RockRidge(rr_path))
    }
}

pub struct UdfFacade<'a> {
    image: &'a mut IsoImage,
}

impl UdfFacade<'_> {
    pub fn add_bytes(&mut self, data: Vec<u8>, udf_path: &str) -> IsoResult<()> {
        self.image.add_bytes(
            data,
            &AddOpts {
                udf_path: Some(udf_path),
                ..AddOpts::default()
            },
        )
    }

    pub fn add_directory(&mut self, udf_path: &str) -> IsoResult<()> {
        self.image.add_directory(&AddOpts {
            udf_path: Some(udf_path),
            ..AddOpts::default()
        })
    }

    pub fn rm_file(&mut self, udf_path: &str) -> IsoResult<()> {
        self.image.rm_file(IsoPathArg::Udf(udf_path))
    }

    pub fn rm_directory(&mut self, udf_path: &str) -> IsoResult<()> {
        self.image.rm_directory(IsoPathArg::Udf(udf_path))
    }

    pub fn get_record(&mut self, udf_path: &str) -> IsoResult<IsoRecord> {
        self.image.get_record(IsoPathArg::Udf(udf_path))
    }

    pub fn list_children(&mut self, udf_path: &str) -> IsoResult<Vec<IsoRecord>> {
        self.image.list_children(IsoPathArg::Udf(udf_path))
    }

    pub fn walk(&mut self, udf_path: &str) -> IsoResult<Vec<(String, Vec<String>, Vec<String>)>> {
        self.image.walk(IsoPathArg::Udf(udf_path))
    }

    pub fn read_file(&mut self, udf_path: &str) -> IsoResult<Vec<u8>> {
        self.image.read_file(IsoPathArg::Udf(udf_path))
    }
}

impl IsoImage {
    /// A surface scoped to the primary hierarchy.
    pub fn get_iso9660_facade(&mut self) -> Iso9660Facade<'_> {
        Iso9660Facade { image: self }
    }

    /// A surface scoped to the Joliet hierarchy.
    pub fn get_joliet_facade(&mut self) -> IsoResult<JolietFacade<'_>> {
        if !self.meta().has_joliet() {
            return Err(IsoError::Invalid("volume has no joliet hierarchy"));
        }
        Ok(JolietFacade { image: self })
    }

    /// A surface scoped to the Rock Ridge names.
    pub fn get_rock_ridge_facade(&mut self) -> IsoResult<RockRidgeFacade<'_>> {
        if !self.meta().has_rock_ridge() {
            return Err(IsoError::Invalid("volume has no rock ridge names"));
        }
        Ok(RockRidgeFacade { image: self })
    }

    /// A surface scoped to the UDF hierarchy.
    pub fn get_udf_facade(&mut self) -> IsoResult<UdfFacade<'_>> {
        if !self.meta().udf {
            return Err(IsoError::Invalid("volume has no udf hierarchy"));
        }
        Ok(UdfFacade { image: self })
    }
}
