//! End-to-end scenarios, exercised through the public façade against an
//! in-memory device.

use std::sync::Arc;

use tinyfs::{FileSystem, FsError, MemDisk};

fn mounted(sectors: u32) -> FileSystem {
    FileSystem::mount(Arc::new(MemDisk::new(sectors)), true).unwrap()
}

/// Repeated one-byte writes to the same sector must coalesce in the cache:
/// the device sees roughly one write per distinct dirty sector, not one per
/// byte.
#[test]
fn buffer_coalesces_writes() {
    let fs = mounted(1024);
    let cwd = fs.root_cwd();
    let start_writes = fs.device_writes();

    fs.create(&cwd, "foonew", 1026, false).unwrap();
    let mut f = fs.open(&cwd, "foonew").unwrap();

    let buf = [0x5au8];
    for _ in 0..64 * 1024 {
        assert_eq!(f.write(&fs, &buf).unwrap(), 1);
    }

    f.seek(0);
    let mut byte = [0u8];
    for _ in 0..64 * 1024 {
        assert_eq!(f.read(&fs, &mut byte).unwrap(), 1);
        assert_eq!(byte[0], 0x5a);
    }

    let total_writes = fs.device_writes() - start_writes;
    // 64 KiB of data is 128 sectors; allow slack for inode and index
    // block write-backs.
    assert!(
        total_writes > 70 && total_writes < 200,
        "unreasonable write count: {}",
        total_writes
    );
    f.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}

/// Rewriting the same two sectors must hit the cache at a strictly better
/// rate than the cold pass did.
#[test]
fn buffer_hit_rate_improves_when_hot() {
    let fs = mounted(1024);
    let cwd = fs.root_cwd();
    fs.create(&cwd, "newfoo", 1026, false).unwrap();
    let mut f = fs.open(&cwd, "newfoo").unwrap();

    let data = [7u8; 1024];
    for chunk in data.chunks(512) {
        assert_eq!(f.write(&fs, chunk).unwrap(), chunk.len());
    }
    let cold_hits = fs.buffer_hits();
    let cold_accesses = fs.buffer_accesses();

    f.seek(0);
    for chunk in data.chunks(512) {
        assert_eq!(f.write(&fs, chunk).unwrap(), chunk.len());
    }
    let hot_hits = fs.buffer_hits() - cold_hits;
    let hot_accesses = fs.buffer_accesses() - cold_accesses;

    // Cross-multiplied hit-rate comparison: hot/hot > cold/cold.
    let diff = hot_accesses as i128 * cold_hits as i128
        - cold_accesses as i128 * hot_hits as i128;
    assert!(diff < 0, "hit rate did not improve: {}", diff);

    f.close(&fs).unwrap();
    fs.remove(&cwd, "newfoo").unwrap();
    cwd.close(&fs).unwrap();
}

#[test]
fn seek_lands_on_the_right_byte() {
    let fs = mounted(256);
    let cwd = fs.root_cwd();
    fs.create(&cwd, "sample.txt", 0, false).unwrap();
    let mut f = fs.open(&cwd, "sample.txt").unwrap();
    f.write(&fs, b"aaaaai-seek-target").unwrap();
    f.close(&fs).unwrap();

    let mut f = fs.open(&cwd, "sample.txt").unwrap();
    f.seek(5);
    let mut block = [0u8; 5];
    assert_eq!(f.read(&fs, &mut block).unwrap(), 5);
    assert_eq!(block[0], b'i');
    assert_eq!(f.tell(), 10);
    f.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}

/// An unlinked file stays fully readable and writable through handles that
/// were open at unlink time; its sectors come back only after the last
/// close.
#[test]
fn unlink_while_open_defers_release() {
    let fs = mounted(256);
    let cwd = fs.root_cwd();
    fs.create(&cwd, "a.txt", 0, false).unwrap();
    let mut f = fs.open(&cwd, "a.txt").unwrap();
    f.write(&fs, b"unlinked but readable").unwrap();
    let home = f.inumber();

    fs.remove(&cwd, "a.txt").unwrap();
    assert_eq!(fs.open(&cwd, "a.txt").unwrap_err(), FsError::NotFound);

    // Everything present at unlink time is still there.
    f.seek(0);
    let mut buf = [0u8; 21];
    assert_eq!(f.read(&fs, &mut buf).unwrap(), 21);
    assert_eq!(&buf, b"unlinked but readable");
    assert_eq!(f.write(&fs, b"!").unwrap(), 1);

    // The home sector is not reusable while the handle lives.
    fs.create(&cwd, "other", 0, false).unwrap();
    let other = fs.open(&cwd, "other").unwrap();
    assert_ne!(other.inumber(), home);
    other.close(&fs).unwrap();

    // After the last close it is the first sector handed out again.
    f.close(&fs).unwrap();
    fs.create(&cwd, "reuse", 0, false).unwrap();
    let reuse = fs.open(&cwd, "reuse").unwrap();
    assert_eq!(reuse.inumber(), home);
    reuse.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}

/// Seventeen entries force a directory past its creation size; rmdir is
/// refused until the directory is empty again.
#[test]
fn directory_growth_and_rmdir_rejection() {
    let fs = mounted(512);
    let cwd = fs.root_cwd();
    fs.mkdir(&cwd, "/x").unwrap();
    let names: Vec<String> = (0..17).map(|i| format!("f{}", i)).collect();
    for name in &names {
        fs.create(&cwd, &format!("/x/{}", name), 0, false).unwrap();
    }

    assert_eq!(fs.remove(&cwd, "/x").unwrap_err(), FsError::NotEmpty);

    let mut dir = fs.open(&cwd, "/x").unwrap();
    let mut listed = Vec::new();
    while let Some(entry) = dir.readdir(&fs).unwrap() {
        listed.push(entry.to_string());
    }
    dir.close(&fs).unwrap();
    let mut sorted = listed.clone();
    sorted.sort_by_key(|n| n[1..].parse::<u32>().unwrap());
    assert_eq!(sorted, names);

    for name in &names {
        fs.remove(&cwd, &format!("/x/{}", name)).unwrap();
    }
    fs.remove(&cwd, "/x").unwrap();
    assert_eq!(fs.open(&cwd, "/x").unwrap_err(), FsError::NotFound);
    cwd.close(&fs).unwrap();
}

/// A 200-sector file spans the direct region and part of the indirect one;
/// writes land where they should and everything else reads as zero.
#[test]
fn cross_region_file_keeps_its_patterns() {
    const LEN: usize = 200 * 512;
    let fs = mounted(2048);
    let cwd = fs.root_cwd();
    fs.create(&cwd, "span", LEN as u32, false).unwrap();
    let mut f = fs.open(&cwd, "span").unwrap();
    assert_eq!(f.len(&fs).unwrap(), LEN as u64);

    let spots: [(u64, &[u8; 4]); 3] =
        [(0, b"edge"), (123 * 512, b"indr"), (199 * 512, b"tail")];
    for (offset, pattern) in spots.iter() {
        f.seek(*offset);
        assert_eq!(f.write(&fs, *pattern).unwrap(), 4);
    }

    let mut contents = vec![0xffu8; LEN];
    f.seek(0);
    assert_eq!(f.read(&fs, &mut contents).unwrap(), LEN);
    for (offset, pattern) in spots.iter() {
        let at = *offset as usize;
        assert_eq!(&contents[at..at + 4], *pattern);
        // Blank out the pattern so the zero sweep below is uniform.
        contents[at..at + 4].copy_from_slice(&[0; 4]);
    }
    assert!(contents.iter().all(|&b| b == 0));

    f.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
    fs.shutdown().unwrap();
}

#[test]
fn write_refused_while_denied() {
    let fs = mounted(256);
    let cwd = fs.root_cwd();
    fs.create(&cwd, "prog", 0, false).unwrap();
    let mut image = fs.open(&cwd, "prog").unwrap();
    image.write(&fs, b"text segment").unwrap();
    image.deny_write(&fs);

    let mut writer = fs.open(&cwd, "prog").unwrap();
    assert_eq!(writer.write(&fs, b"clobber"), Err(FsError::WriteDenied));
    let mut buf = [0u8; 4];
    assert_eq!(writer.read(&fs, &mut buf).unwrap(), 4);

    image.allow_write();
    assert_eq!(writer.write(&fs, b"fine").unwrap(), 4);
    writer.close(&fs).unwrap();
    image.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}

#[test]
fn directory_handles_refuse_file_io() {
    let fs = mounted(256);
    let cwd = fs.root_cwd();
    fs.mkdir(&cwd, "d").unwrap();
    let mut dir = fs.open(&cwd, "d").unwrap();
    assert!(dir.is_dir(&fs).unwrap());
    let mut buf = [0u8; 8];
    assert_eq!(dir.read(&fs, &mut buf), Err(FsError::IsADirectory));
    assert_eq!(dir.write(&fs, &buf), Err(FsError::IsADirectory));
    dir.close(&fs).unwrap();

    fs.create(&cwd, "plain", 0, false).unwrap();
    let mut plain = fs.open(&cwd, "plain").unwrap();
    assert_eq!(plain.readdir(&fs).unwrap_err(), FsError::NotADirectory);
    plain.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}
