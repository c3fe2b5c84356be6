//! Concurrency properties: the cache, the free map and the open-inode
//! table are shared by every thread; handles and working directories are
//! not.

use std::sync::Arc;
use std::thread;

use tinyfs::{FileSystem, MemDisk};

const THREADS: usize = 8;

#[test]
fn writers_on_distinct_files_do_not_interfere() {
    let fs = FileSystem::mount(Arc::new(MemDisk::new(4096)), true).unwrap();

    thread::scope(|scope| {
        for t in 0..THREADS {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                let path = format!("t{}", t);
                fs.create(&cwd, &path, 0, false).unwrap();
                let mut f = fs.open(&cwd, &path).unwrap();

                let data: Vec<u8> = (0..4096).map(|i| (i as u8) ^ (t as u8)).collect();
                assert_eq!(f.write(fs, &data).unwrap(), data.len());

                f.seek(0);
                let mut back = vec![0u8; data.len()];
                assert_eq!(f.read(fs, &mut back).unwrap(), data.len());
                assert_eq!(back, data);
                f.close(fs).unwrap();
                cwd.close(fs).unwrap();
            });
        }
    });
    fs.shutdown().unwrap();
}

#[test]
fn concurrent_opens_see_one_inode() {
    let fs = FileSystem::mount(Arc::new(MemDisk::new(512)), true).unwrap();
    let cwd = fs.root_cwd();
    fs.create(&cwd, "shared", 0, false).unwrap();
    let mut f = fs.open(&cwd, "shared").unwrap();
    f.write(&fs, b"same record for everyone").unwrap();
    let home = f.inumber();
    f.close(&fs).unwrap();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                for _ in 0..50 {
                    let mut f = fs.open(&cwd, "shared").unwrap();
                    assert_eq!(f.inumber(), home);
                    let mut buf = [0u8; 4];
                    assert_eq!(f.read(fs, &mut buf).unwrap(), 4);
                    assert_eq!(&buf, b"same");
                    f.close(fs).unwrap();
                }
                cwd.close(fs).unwrap();
            });
        }
    });
    cwd.close(&fs).unwrap();
}

#[test]
fn sliced_writes_to_one_file_all_land() {
    const SLICE: usize = 4096;
    let fs = FileSystem::mount(Arc::new(MemDisk::new(4096)), true).unwrap();
    let cwd = fs.root_cwd();
    fs.create(&cwd, "big", (THREADS * SLICE) as u32, false).unwrap();

    thread::scope(|scope| {
        for t in 0..THREADS {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                let mut f = fs.open(&cwd, "big").unwrap();
                f.seek((t * SLICE) as u64);
                let slice = vec![t as u8 + 1; SLICE];
                assert_eq!(f.write(fs, &slice).unwrap(), SLICE);
                f.close(fs).unwrap();
                cwd.close(fs).unwrap();
            });
        }
    });

    let mut f = fs.open(&cwd, "big").unwrap();
    let mut back = vec![0u8; THREADS * SLICE];
    assert_eq!(f.read(&fs, &mut back).unwrap(), back.len());
    for t in 0..THREADS {
        assert!(back[t * SLICE..(t + 1) * SLICE].iter().all(|&b| b == t as u8 + 1));
    }
    f.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
}

#[test]
fn concurrent_growth_is_serialized() {
    const SLICE: usize = 8 * 1024;
    let fs = FileSystem::mount(Arc::new(MemDisk::new(4096)), true).unwrap();
    let cwd = fs.root_cwd();
    fs.create(&cwd, "grown", 0, false).unwrap();

    // Every thread extends the file past its end from a different offset;
    // the free-map lock serializes the growth walks.
    thread::scope(|scope| {
        for t in 0..THREADS {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                let mut f = fs.open(&cwd, "grown").unwrap();
                f.seek((t * SLICE) as u64);
                let slice = vec![0xa0 | t as u8; SLICE];
                assert_eq!(f.write(fs, &slice).unwrap(), SLICE);
                f.close(fs).unwrap();
                cwd.close(fs).unwrap();
            });
        }
    });

    let mut f = fs.open(&cwd, "grown").unwrap();
    assert_eq!(f.len(&fs).unwrap(), (THREADS * SLICE) as u64);
    let mut back = vec![0u8; THREADS * SLICE];
    assert_eq!(f.read(&fs, &mut back).unwrap(), back.len());
    for t in 0..THREADS {
        assert!(back[t * SLICE..(t + 1) * SLICE]
            .iter()
            .all(|&b| b == 0xa0 | t as u8));
    }
    f.close(&fs).unwrap();
    cwd.close(&fs).unwrap();
    fs.shutdown().unwrap();
}

#[test]
fn mixed_readers_and_writers_on_one_sector() {
    let fs = FileSystem::mount(Arc::new(MemDisk::new(512)), true).unwrap();
    let cwd = fs.root_cwd();
    fs.create(&cwd, "cell", 512, false).unwrap();

    // Writers store a self-consistent 512-byte stamp; readers must always
    // observe one stamp, never a torn mix.
    thread::scope(|scope| {
        for t in 0..4u8 {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                let mut f = fs.open(&cwd, "cell").unwrap();
                let stamp = [t; 512];
                for _ in 0..100 {
                    f.seek(0);
                    assert_eq!(f.write(fs, &stamp).unwrap(), 512);
                }
                f.close(fs).unwrap();
                cwd.close(fs).unwrap();
            });
        }
        for _ in 0..4 {
            let fs = &fs;
            scope.spawn(move || {
                let cwd = fs.root_cwd();
                let mut f = fs.open(&cwd, "cell").unwrap();
                for _ in 0..100 {
                    f.seek(0);
                    let mut buf = [0u8; 512];
                    assert_eq!(f.read(fs, &mut buf).unwrap(), 512);
                    assert!(buf.iter().all(|&b| b == buf[0]), "torn read");
                }
                f.close(fs).unwrap();
                cwd.close(fs).unwrap();
            });
        }
    });
    cwd.close(&fs).unwrap();
}
