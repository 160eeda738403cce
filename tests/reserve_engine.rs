//! End-to-end reservation behavior against a real directory.

use anyhow::{ensure, Context};
use pfnr::context::{ContextConfig, ProductMetadata, VenueType};
use pfnr::grammar::FileKind;
use pfnr::paths::OutputLayout;
use pfnr::{
    classify, BuildError, EngineConfig, FilenameGrammar, ProductFilenameBuilder, ProductVersion,
    Reservation, ReservePolicy, VersionScanner,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

fn reserve(dir: &Path, name: &str, partial: bool) -> anyhow::Result<Reservation> {
    let mut pfn = ProductFilenameBuilder::new(FilenameGrammar::default())
        .product_path(dir)
        .product_name(name)
        .partial(partial)
        .build()?;
    Ok(pfn.reserve()?.clone())
}

fn file_name(path: &Path) -> anyhow::Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .context("utf-8 file name")
}

#[test]
fn partial_complete_partial_sequence() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut seen = Vec::new();
    for partial in [true, true, false, true] {
        seen.push(reserve(dir.path(), "Image_0000000100-00000", partial)?);
    }
    let names = seen
        .iter()
        .map(|r| file_name(&r.data_file).map(str::to_string))
        .collect::<anyhow::Result<Vec<_>>>()?;
    ensure!(
        names
            == [
                "Image_0000000100-00000_Partial-1.1.pdat",
                "Image_0000000100-00000_Partial-1.2.pdat",
                "Image_0000000100-00000-2.dat",
                "Image_0000000100-00000_Partial-3.1.pdat",
            ],
        "{names:?}"
    );
    Ok(())
}

#[test]
fn versions_only_grow() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut last: Option<ProductVersion> = None;
    for partial in [false, true, true, false, false, true, false] {
        let r = reserve(dir.path(), "p", partial)?;
        if let Some(prev) = last {
            ensure!(r.version > prev, "{} after {prev}", r.version);
        }
        last = Some(r.version);
    }
    Ok(())
}

#[test]
fn each_reservation_is_a_fresh_pair() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let r = reserve(dir.path(), "p", false)?;
    ensure!(r.data_file.parent() == r.metadata_file.parent());
    ensure!(fs::metadata(&r.data_file)?.len() == 0);
    ensure!(fs::metadata(&r.metadata_file)?.len() == 0);

    // Writing into the first pair does not disturb the second reservation.
    fs::write(&r.data_file, b"payload")?;
    let next = reserve(dir.path(), "p", false)?;
    ensure!(next.version == ProductVersion::complete(2));
    ensure!(fs::read(&r.data_file)? == b"payload");
    Ok(())
}

#[test]
fn lock_files_do_not_count_as_versions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("foo-3.dat"), b"")?;
    fs::write(dir.path().join("foo-3.dat.lock"), b"aaaa\n")?;
    fs::write(dir.path().join("foo-7.dat.lock"), b"bbbb\n")?;
    let r = reserve(dir.path(), "foo", false)?;
    ensure!(file_name(&r.data_file)? == "foo-4.dat");
    Ok(())
}

#[test]
fn similar_names_do_not_share_versions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    for _ in 0..3 {
        reserve(dir.path(), "Eng_1", false)?;
    }
    let r = reserve(dir.path(), "Eng", false)?;
    ensure!(r.version == ProductVersion::complete(1));
    Ok(())
}

#[test]
fn reserved_files_reconstruct_to_the_same_identity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let grammar = FilenameGrammar::default();
    for partial in [false, true] {
        let mut pfn = ProductFilenameBuilder::new(grammar.clone())
            .product_path(dir.path())
            .product_name("Img_0000000001-00002")
            .partial(partial)
            .build()?;
        let r = pfn.reserve()?.clone();
        for path in [&r.data_file, &r.metadata_file] {
            let id = classify(&grammar, path).context("reserved file classifies")?;
            ensure!(&id.product_path == pfn.product_path());
            ensure!(id.product_name == pfn.product_name());
            ensure!(id.partial == partial);
        }
        let parsed = grammar
            .parse_file_name(file_name(&r.metadata_file)?)
            .context("metadata parses")?;
        ensure!(parsed.version == r.version);
        ensure!(parsed.kind == FileKind::Metadata);
    }
    Ok(())
}

#[test]
fn concurrent_reservations_never_share_a_version() -> anyhow::Result<()> {
    const WORKERS: usize = 8;
    const PER_WORKER: usize = 6;

    let dir = tempfile::tempdir()?;
    let root = dir.path().to_path_buf();
    let barrier = Arc::new(Barrier::new(WORKERS));
    let policy = ReservePolicy {
        max_retries: 1_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    };

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> anyhow::Result<Vec<Reservation>> {
                barrier.wait();
                let mut out = Vec::new();
                for i in 0..PER_WORKER {
                    let mut pfn = ProductFilenameBuilder::new(FilenameGrammar::default())
                        .policy(policy)
                        .product_path(&root)
                        .product_name("Contended")
                        .partial((worker + i) % 3 == 0)
                        .build()?;
                    out.push(pfn.reserve()?.clone());
                }
                Ok(out)
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let reserved = handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        all.extend(reserved);
    }

    ensure!(all.len() == WORKERS * PER_WORKER);
    let versions: HashSet<_> = all.iter().map(|r| r.version).collect();
    ensure!(versions.len() == all.len(), "duplicate versions handed out");
    let files: HashSet<_> = all
        .iter()
        .flat_map(|r| [r.data_file.clone(), r.metadata_file.clone()])
        .collect();
    ensure!(files.len() == all.len() * 2, "duplicate files handed out");
    for path in &files {
        ensure!(path.exists(), "{} missing", path.display());
    }
    Ok(())
}

#[test]
fn peek_matches_the_next_reservation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let grammar = FilenameGrammar::default();
    let scanner = VersionScanner::new(&grammar);
    for partial in [true, false, true, true] {
        let peeked = scanner.peek_next(dir.path(), "p", partial)?;
        ensure!(reserve(dir.path(), "p", partial)?.version == peeked);
    }
    Ok(())
}

#[test]
fn configured_grammar_drives_file_names() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = EngineConfig::from_json(
        r#"{ "grammar": {
            "data_extension": ".bin",
            "partial_data_extension": ".pbin",
            "metadata_extension": ".xml",
            "partial_metadata_extension": ".pxml",
            "partial_marker": "_Incomplete"
        } }"#,
    )?;
    let mut pfn = cfg
        .builder()
        .product_path(dir.path())
        .product_name("p")
        .partial(true)
        .build()?;
    let r = pfn.reserve()?.clone();
    ensure!(file_name(&r.data_file)? == "p_Incomplete-1.1.pbin");
    ensure!(file_name(&r.metadata_file)? == "p_Incomplete-1.1.pxml");
    Ok(())
}

#[test]
fn base_names_ending_in_the_marker_stay_reservable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let tight = ReservePolicy {
        max_retries: 3,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
    };
    let reserve_with = |name: &str, partial: bool| -> anyhow::Result<ProductVersion> {
        let mut pfn = ProductFilenameBuilder::new(FilenameGrammar::default())
            .policy(tight)
            .product_path(dir.path())
            .product_name(name)
            .partial(partial)
            .build()?;
        Ok(pfn.reserve()?.version)
    };

    ensure!(reserve_with("Eng_Partial", false)? == ProductVersion::complete(1));
    ensure!(reserve_with("Eng_Partial", false)? == ProductVersion::complete(2));
    ensure!(reserve_with("Eng_Partial", true)? == ProductVersion::partial(3, 1));
    ensure!(reserve_with("Eng_Partial", true)? == ProductVersion::partial(3, 2));
    // None of the files above belong to `Eng`.
    ensure!(reserve_with("Eng", true)? == ProductVersion::partial(1, 1));
    Ok(())
}

#[test]
fn empty_product_name_never_reaches_the_filesystem() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let built = ProductFilenameBuilder::new(FilenameGrammar::default())
        .product_path(dir.path())
        .product_name("")
        .build();
    ensure!(matches!(built, Err(BuildError::EmptyName)));
    ensure!(fs::read_dir(dir.path())?.count() == 0);
    Ok(())
}

#[test]
fn constructed_products_reconstruct_after_reserve() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let grammar = FilenameGrammar::default();
    let layout = OutputLayout::default();
    let ctx = ContextConfig {
        venue: VenueType::Testbed,
        output_dir: dir.path().join("sessions/2024/032/ampcs"),
        host: "gds1".to_string(),
        user: "ops".to_string(),
        session_name: "pass 7".to_string(),
        start_time: OffsetDateTime::parse("2024-02-01T03:04:05Z", &Rfc3339)?,
    };

    for partial in [false, true] {
        let md = ProductMetadata {
            product_type: "Image".to_string(),
            apid: 3,
            scet: OffsetDateTime::parse("2024-02-02T00:00:00Z", &Rfc3339)?,
            dvt_coarse: 4_000_000_000,
            dvt_fine: 65_535,
            partial,
            compressed: false,
        };
        let mut pfn = ProductFilenameBuilder::new(grammar.clone())
            .venue_appropriate_location(&ctx, &md, &layout)
            .build()?;
        ensure!(pfn.product_name() == "Image_4000000000-65535");
        let r = pfn.reserve()?.clone();
        for path in [&r.data_file, &r.metadata_file] {
            let id = classify(&grammar, path).context("constructed file classifies")?;
            ensure!(&id.product_path == pfn.product_path(), "{}", path.display());
            ensure!(id.product_name == pfn.product_name());
            ensure!(id.partial == partial);
        }
    }
    Ok(())
}
