// SPDX-License-Identifier: MIT

use opalfs::iso::*;
use opalfs::{AddOpts, ElToritoOpts, IsoImage, IsoOpts, IsoPathArg};
use opalio::prelude::*;

fn write_bytes(image: &mut IsoImage) -> Vec<u8> {
    let mut out = MemOpalIO::new();
    image.write_fp(&mut out).expect("write failed");
    out.into_vec()
}

fn populated_image() -> IsoImage {
    let mut image = IsoImage::new(
        IsoOpts::new(1)
            .rock_ridge("1.09")
            .joliet(3)
            .vol_ident("ROUNDTRIP"),
    )
    .unwrap();

    image
        .add_directory(&AddOpts {
            iso_path: Some("/SUBDIR"),
            rr_name: Some("subdir"),
            joliet_path: Some("/subdir"),
            ..AddOpts::default()
        })
        .unwrap();
    image
        .add_bytes(
            b"hello, optical world\n".to_vec(),
            &AddOpts {
                iso_path: Some("/SUBDIR/HELLO.TXT;1"),
                rr_name: Some("hello.txt"),
                joliet_path: Some("/subdir/hello.txt"),
                ..AddOpts::default()
            },
        )
        .unwrap();
    image
        .add_bytes(
            vec![0xA5; 5000],
            &AddOpts {
                iso_path: Some("/BIG.BIN;1"),
                rr_name: Some("big.bin"),
                joliet_path: Some("/big.bin"),
                ..AddOpts::default()
            },
        )
        .unwrap();
    image
        .add_bytes(
            vec![],
            &AddOpts {
                iso_path: Some("/EMPTY.;1"),
                rr_name: Some("empty"),
                joliet_path: Some("/empty"),
                ..AddOpts::default()
            },
        )
        .unwrap();
    image
        .add_eltorito("/SUBDIR/HELLO.TXT;1", &ElToritoOpts::default())
        .unwrap();
    image
}

#[test]
fn test_parse_write_is_byte_identical() {
    let mut image = populated_image();
    let first = write_bytes(&mut image);

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(first.clone())).unwrap();
    let second = write_bytes(&mut reopened);

    assert_eq!(first.len(), second.len());
    for (i, (a, b)) in first
        .chunks(ISO_BLOCK_SIZE)
        .zip(second.chunks(ISO_BLOCK_SIZE))
        .enumerate()
    {
        assert_eq!(a, b, "block {i} differs after reopen");
    }
}

#[test]
fn test_force_consistency_is_idempotent() {
    let mut image = populated_image();
    image.force_consistency().unwrap();
    let hello_a = image
        .get_record(IsoPathArg::IsoPath("/SUBDIR/HELLO.TXT;1"))
        .unwrap();
    let blocks_a = image.total_blocks().unwrap();

    image.force_consistency().unwrap();
    let hello_b = image
        .get_record(IsoPathArg::IsoPath("/SUBDIR/HELLO.TXT;1"))
        .unwrap();
    assert_eq!(hello_a, hello_b);
    assert_eq!(blocks_a, image.total_blocks().unwrap());
}

#[test]
fn test_zero_length_file_roundtrips() {
    let mut image = populated_image();
    let bytes = write_bytes(&mut image);

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let rec = reopened.get_record(IsoPathArg::IsoPath("/EMPTY.;1")).unwrap();
    assert_eq!(rec.length, 0);
    assert_eq!(rec.extent, 0, "no extents allocated for empty payloads");
    assert_eq!(
        reopened.read_file(IsoPathArg::IsoPath("/EMPTY.;1")).unwrap(),
        Vec::<u8>::new()
    );
}

#[test]
fn test_rock_ridge_names_survive_roundtrip() {
    let mut image = populated_image();
    let bytes = write_bytes(&mut image);

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let rec = reopened
        .get_record(IsoPathArg::RockRidge("/subdir/hello.txt"))
        .unwrap();
    assert_eq!(rec.name, "hello.txt");
    assert_eq!(
        reopened
            .read_file(IsoPathArg::RockRidge("/subdir/hello.txt"))
            .unwrap(),
        b"hello, optical world\n"
    );
}

#[test]
fn test_long_rock_ridge_name_spills_to_continuation_area() {
    let mut image = IsoImage::new(IsoOpts::new(1).rock_ridge("1.09")).unwrap();
    let long_name: String = core::iter::repeat('n').take(240).collect();
    image
        .add_bytes(
            b"spill\n".to_vec(),
            &AddOpts {
                iso_path: Some("/LONG.;1"),
                rr_name: Some(&long_name),
                ..AddOpts::default()
            },
        )
        .unwrap();

    let bytes = write_bytes(&mut image);
    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let path = format!("/{long_name}");
    let rec = reopened.get_record(IsoPathArg::RockRidge(&path)).unwrap();
    assert_eq!(rec.name, long_name);
    assert_eq!(
        reopened.read_file(IsoPathArg::RockRidge(&path)).unwrap(),
        b"spill\n"
    );
}

#[test]
fn test_walk_lists_every_namespace_entry() {
    let mut image = populated_image();

    let iso_walk = image.walk(IsoPathArg::IsoPath("/")).unwrap();
    assert_eq!(iso_walk[0].0, "/");
    assert!(iso_walk[0].1.contains(&"SUBDIR".to_string()));
    assert!(iso_walk[0].2.contains(&"BIG.BIN;1".to_string()));

    let joliet_walk = image.walk(IsoPathArg::Joliet("/")).unwrap();
    assert!(joliet_walk[0].1.contains(&"subdir".to_string()));
    assert!(joliet_walk[0].2.contains(&"big.bin".to_string()));

    let rr_walk = image.walk(IsoPathArg::RockRidge("/")).unwrap();
    assert!(rr_walk[0].2.contains(&"big.bin".to_string()));
}

#[test]
fn test_udf_bridge_roundtrip() {
    let mut image = IsoImage::new(IsoOpts::new(1).udf().vol_ident("UDFBRIDGE")).unwrap();
    image
        .add_bytes(
            b"bridged content\n".to_vec(),
            &AddOpts {
                iso_path: Some("/DATA.;1"),
                udf_path: Some("/data.bin"),
                ..AddOpts::default()
            },
        )
        .unwrap();

    let first = write_bytes(&mut image);

    // The anchor sits at block 256 and at the final block.
    use opalfs::fs::iso::types::udf::Avdp;
    let anchor = Avdp::parse(&first[256 * ISO_BLOCK_SIZE..], 256).unwrap();
    assert_eq!(anchor.main_vds.pos, 32);
    let last = first.len() / ISO_BLOCK_SIZE - 1;
    Avdp::parse(&first[last * ISO_BLOCK_SIZE..], last as u64).unwrap();

    let mut reopened = IsoImage::open(MemOpalIO::from_vec(first.clone())).unwrap();
    assert_eq!(
        reopened.read_file(IsoPathArg::Udf("/data.bin")).unwrap(),
        b"bridged content\n"
    );
    let iso = reopened.get_record(IsoPathArg::IsoPath("/DATA.;1")).unwrap();
    let udf = reopened.get_record(IsoPathArg::Udf("/data.bin")).unwrap();
    assert_eq!(iso.extent, udf.extent, "bridge shares one payload");

    let second = write_bytes(&mut reopened);
    assert_eq!(first, second, "udf bridge image round-trips");
}

#[test]
fn test_symlink_survives_roundtrip() {
    let mut image = IsoImage::new(IsoOpts::new(1).rock_ridge("1.09")).unwrap();
    image
        .add_bytes(
            b"real\n".to_vec(),
            &AddOpts {
                iso_path: Some("/REAL.;1"),
                rr_name: Some("real"),
                ..AddOpts::default()
            },
        )
        .unwrap();
    image
        .add_symlink("/LINK.;1", "link", "/real")
        .unwrap();

    let bytes = write_bytes(&mut image);
    let mut reopened = IsoImage::open(MemOpalIO::from_vec(bytes)).unwrap();
    let rec = reopened.get_record(IsoPathArg::RockRidge("/link")).unwrap();
    assert_eq!(rec.symlink_target.as_deref(), Some("/real"));
    assert_eq!(rec.length, 0);
}

#[test]
fn test_facades_scope_to_one_namespace() {
    let mut image = IsoImage::new(IsoOpts::new(1).rock_ridge("1.09").joliet(3)).unwrap();

    {
        let mut joliet = image.get_joliet_facade().unwrap();
        joliet.add_directory("/Artwork").unwrap();
        joliet
            .add_bytes(b"pixels".to_vec(), "/Artwork/cover art.png")
            .unwrap();
        assert_eq!(joliet.read_file("/Artwork/cover art.png").unwrap(), b"pixels");
    }

    // The facade derived legal primary-hierarchy names.
    let children = image.list_children(IsoPathArg::IsoPath("/ARTWORK")).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "COVER_AR.PNG;1");

    {
        let mut rr = image.get_rock_ridge_facade().unwrap();
        rr.add_bytes(b"notes".to_vec(), "/readme.md", 0o100644).unwrap();
        assert_eq!(rr.read_file("/readme.md").unwrap(), b"notes");
    }

    assert!(image.get_udf_facade().is_err(), "udf was not enabled");
}

#[test]
fn test_add_requires_some_path() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    let err = image
        .add_bytes(b"x".to_vec(), &AddOpts::default())
        .unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}

#[test]
fn test_missing_intermediate_directory_is_invalid() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    let err = image
        .add_bytes(
            b"x".to_vec(),
            &AddOpts {
                iso_path: Some("/NOPE/FILE.;1"),
                ..AddOpts::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}

#[test]
fn test_closed_volume_rejects_operations() {
    let mut image = IsoImage::new(IsoOpts::default()).unwrap();
    image.close();
    let err = image
        .add_bytes(b"x".to_vec(), &AddOpts {
            iso_path: Some("/X.;1"),
            ..AddOpts::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}

#[test]
fn test_rm_file_drops_all_namespaces() {
    let mut image = populated_image();
    image.rm_eltorito().unwrap();
    image.rm_file(IsoPathArg::IsoPath("/SUBDIR/HELLO.TXT;1")).unwrap();

    assert!(image.get_record(IsoPathArg::IsoPath("/SUBDIR/HELLO.TXT;1")).is_err());
    assert!(image.get_record(IsoPathArg::Joliet("/subdir/hello.txt")).is_err());

    // The directory can now be emptied and removed everywhere.
    image.rm_directory(IsoPathArg::IsoPath("/SUBDIR")).unwrap();
    assert!(image.get_record(IsoPathArg::Joliet("/subdir")).is_err());
}

#[test]
fn test_boot_file_removal_is_guarded() {
    let mut image = populated_image();
    let err = image
        .rm_file(IsoPathArg::IsoPath("/SUBDIR/HELLO.TXT;1"))
        .unwrap_err();
    assert_eq!(err.kind(), opalfs::IsoErrorKind::InvalidInput);
}
