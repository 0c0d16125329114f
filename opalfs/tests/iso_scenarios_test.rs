// SPDX-License-Identifier: MIT

use opalfs::iso::*;
use opalfs::{AddOpts, ElToritoOpts, IsoImage, IsoOpts, IsoPathArg};
use opalio::prelude::*;

fn write_bytes(image: &mut IsoImage) -> Vec<u8> {
    let mut out = MemOpalIO::new();
    image.write_fp(&mut out).expect("write failed");
    out.into_vec()
}

fn add_foo(image: &mut IsoImage, joliet: bool) {
    image
        .add_bytes(
            b"foo\n".to_vec(),
            &AddOpts {
                iso_path: Some("/FOO.;1"),
                joliet_path: joliet.then_some("/foo"),
                ..AddOpts::default()
            },
        )
        .unwrap();
}

#[test]
fn test_new_image_with_file_and_directory() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    add_foo(&mut image, false);
    image
        .add_directory(&AddOpts {
            iso_path: Some("/DIR1"),
            ..AddOpts::default()
        })
        .unwrap();

    let bytes = write_bytes(&mut image);
    assert_eq!(bytes.len() % ISO_BLOCK_SIZE, 0);

    // The PVD volume space size covers exactly the written blocks.
    let pvd = &bytes[16 * ISO_BLOCK_SIZE..17 * ISO_BLOCK_SIZE];
    let space = u32::from_le_bytes(pvd[80..84].try_into().unwrap());
    assert_eq!(space as usize, bytes.len() / ISO_BLOCK_SIZE);
    // Small image: well under 30 blocks.
    assert!(space < 30, "space size {space}");

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    assert_eq!(
        reopened.read_file(IsoPathArg::IsoPath("/FOO.;1")).unwrap(),
        b"foo\n"
    );
    assert!(
        reopened
            .list_children(IsoPathArg::IsoPath("/DIR1"))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_joliet_file_shares_payload() {
    let mut image = IsoImage::new(IsoOpts::new(1).joliet(3)).unwrap();
    add_foo(&mut image, true);
    let bytes = write_bytes(&mut image);

    // A supplementary descriptor with the UCS-2 level 3 escape exists.
    let svd = &bytes[17 * ISO_BLOCK_SIZE..18 * ISO_BLOCK_SIZE];
    assert_eq!(svd[0], 2);
    assert_eq!(&svd[88..91], &[0x25, 0x2F, 0x45]);

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let iso = reopened.get_record(IsoPathArg::IsoPath("/FOO.;1")).unwrap();
    let joliet = reopened.get_record(IsoPathArg::Joliet("/foo")).unwrap();
    assert_eq!(
        reopened.read_file(IsoPathArg::Joliet("/foo")).unwrap(),
        b"foo\n"
    );
    assert_eq!(iso.extent, joliet.extent, "one payload, two names");
}

#[test]
fn test_hard_links_are_per_namespace() {
    let mut image = IsoImage::new(IsoOpts::new(1).joliet(3)).unwrap();
    add_foo(&mut image, true);

    image
        .add_hard_link(
            IsoPathArg::IsoPath("/FOO.;1"),
            IsoPathArg::IsoPath("/BAR.;1"),
            None,
        )
        .unwrap();
    image.rm_hard_link(IsoPathArg::Joliet("/foo")).unwrap();

    let bytes = write_bytes(&mut image);
    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();

    let foo = reopened.get_record(IsoPathArg::IsoPath("/FOO.;1")).unwrap();
    let bar = reopened.get_record(IsoPathArg::IsoPath("/BAR.;1")).unwrap();
    assert_eq!(foo.extent, bar.extent, "hard link shares the payload");

    // The Joliet hierarchy is present but empty.
    let children = reopened.list_children(IsoPathArg::Joliet("/")).unwrap();
    assert!(children.is_empty());
    assert!(reopened.get_record(IsoPathArg::Joliet("/foo")).is_err());
}

#[test]
fn test_eltorito_catalog_validates() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    image
        .add_bytes(
            b"boot\n".to_vec(),
            &AddOpts {
                iso_path: Some("/BOOT.;1"),
                ..AddOpts::default()
            },
        )
        .unwrap();
    image
        .add_eltorito("/BOOT.;1", &ElToritoOpts::default())
        .unwrap();

    let bytes = write_bytes(&mut image);

    // Boot record descriptor right after the PVD.
    let br = &bytes[17 * ISO_BLOCK_SIZE..18 * ISO_BLOCK_SIZE];
    assert_eq!(br[0], 0);
    assert!(br[7..].starts_with(b"EL TORITO SPECIFICATION"));
    let cat_extent = u32::from_le_bytes(br[71..75].try_into().unwrap()) as usize;

    let catalog = &bytes[cat_extent * ISO_BLOCK_SIZE..(cat_extent + 1) * ISO_BLOCK_SIZE];
    // Validation entry sums to zero mod 0x10000.
    let mut sum = 0u16;
    for word in catalog[..32].chunks_exact(2) {
        sum = sum.wrapping_add(u16::from_le_bytes(word.try_into().unwrap()));
    }
    assert_eq!(sum, 0);
    assert_eq!(catalog[30], 0x55);
    assert_eq!(catalog[31], 0xAA);

    // The initial entry names the boot file's extent.
    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes.clone())).unwrap();
    let boot = reopened.get_record(IsoPathArg::IsoPath("/BOOT.;1")).unwrap();
    let load_rba = u32::from_le_bytes(catalog[40..44].try_into().unwrap());
    assert_eq!(catalog[32], 0x88);
    assert_eq!(load_rba, boot.extent);
}

#[test]
fn test_modify_file_in_place_changes_little() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    add_foo(&mut image, false);
    image
        .add_directory(&AddOpts {
            iso_path: Some("/DIR1"),
            ..AddOpts::default()
        })
        .unwrap();
    let original = write_bytes(&mut image);

    let mut opened = IsoImage::open(MemOpalIO::from_vec(original.clone())).unwrap();
    opened
        .modify_file_in_place(b"bazzzzzz\n", "/FOO.;1")
        .unwrap();
    let modified = write_bytes(&mut opened);

    assert_eq!(
        opened.read_file(IsoPathArg::IsoPath("/FOO.;1")).unwrap(),
        b"bazzzzzz\n"
    );

    assert_eq!(original.len(), modified.len());
    let differing: Vec<usize> = (0..original.len() / ISO_BLOCK_SIZE)
        .filter(|&i| {
            original[i * ISO_BLOCK_SIZE..(i + 1) * ISO_BLOCK_SIZE]
                != modified[i * ISO_BLOCK_SIZE..(i + 1) * ISO_BLOCK_SIZE]
        })
        .collect();
    // Only the payload block and the directory block holding the
    // file's record may change.
    assert!(
        differing.len() <= 2,
        "unexpected differing blocks: {differing:?}"
    );
}

#[test]
fn test_in_place_growth_beyond_extent_is_invalid() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    add_foo(&mut image, false);
    let bytes = write_bytes(&mut image);

    let mut opened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let big = vec![0u8; ISO_BLOCK_SIZE + 1];
    let err = opened.modify_file_in_place(&big, "/FOO.;1").unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}

#[test]
fn test_deep_directory_relocates_under_rr_moved() {
    let mut image = IsoImage::new(IsoOpts::new(1).rock_ridge("1.09")).unwrap();

    let mut path = String::new();
    for i in 1..=9 {
        path.push_str(&format!("/D{i}"));
        let name = format!("d{i}");
        image
            .add_directory(&AddOpts {
                iso_path: Some(&path),
                rr_name: Some(&name),
                ..AddOpts::default()
            })
            .unwrap();
    }

    // Directory 9 is stored under RR_MOVED in the primary hierarchy.
    let relocated = image
        .get_record(IsoPathArg::IsoPath("/RR_MOVED/D9"))
        .unwrap();
    assert!(relocated.is_dir);

    // The Rock Ridge view still sees the full nesting.
    let deep = image
        .get_record(IsoPathArg::RockRidge("/d1/d2/d3/d4/d5/d6/d7/d8/d9"))
        .unwrap();
    assert!(deep.is_dir);
    assert_eq!(deep.extent, relocated.extent);

    // And the triangle survives a write/reopen cycle.
    let bytes = write_bytes(&mut image);
    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let relocated = reopened
        .get_record(IsoPathArg::IsoPath("/RR_MOVED/D9"))
        .unwrap();
    let deep = reopened
        .get_record(IsoPathArg::RockRidge("/d1/d2/d3/d4/d5/d6/d7/d8/d9"))
        .unwrap();
    assert_eq!(deep.extent, relocated.extent);
    // The placeholder resolves through the child link too.
    let via_cl = reopened
        .get_record(IsoPathArg::IsoPath("/D1/D2/D3/D4/D5/D6/D7/D8/D9"))
        .unwrap();
    assert_eq!(via_cl.extent, relocated.extent);
}

#[test]
fn test_deep_directory_without_rock_ridge_is_invalid() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    let mut path = String::new();
    for i in 1..=8 {
        path.push_str(&format!("/D{i}"));
        image
            .add_directory(&AddOpts {
                iso_path: Some(&path),
                ..AddOpts::default()
            })
            .unwrap();
    }
    path.push_str("/D9");
    let err = image
        .add_directory(&AddOpts {
            iso_path: Some(&path),
            ..AddOpts::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}
