//! Exercises the exact resume protocol the controller relies on: a copy
//! interrupted partway writes a resume record that, when read back, lets a
//! fresh copy run finish the remaining bytes.

use std::fs::{File, OpenOptions};
use std::io::Write;

use luksipc_core::chunk::Chunk;
use luksipc_core::copy_engine::{self, CopyEngineState, CopyResult};
use luksipc_core::resume::ResumeRecord;
use luksipc_core::signal::ShutdownFlag;
use luksipc_core::stats::ProgressStats;

fn pseudo_random_stream(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

fn open_rw(path: &std::path::Path) -> File {
    OpenOptions::new().read(true).write(true).open(path).unwrap()
}

#[test]
fn interrupted_copy_resumes_and_finishes_with_correct_content() {
    let chunk_size = 64 * 1024;
    let total = 10 * chunk_size;
    let data = pseudo_random_stream(99, total);

    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src");
    std::fs::write(&src_path, &data).unwrap();

    let dst_path = dir.path().join("dst");
    File::create(&dst_path).unwrap().set_len(total as u64).unwrap();

    let resume_path = dir.path().join("resume.bin");
    let mut resume_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&resume_path)
        .unwrap();

    // Phase 1: simulate a live run that already wrote the first 3 chunks and
    // has the 4th chunk sitting in memory when a shutdown is requested.
    {
        let read_fd = open_rw(&src_path);
        let write_fd = open_rw(&dst_path);
        write_fd.sync_all().unwrap();
        let mut written_so_far = OpenOptions::new().write(true).open(&dst_path).unwrap();
        written_so_far.write_all(&data[..3 * chunk_size]).unwrap();
        written_so_far.sync_all().unwrap();

        let mut active = Chunk::alloc(chunk_size);
        active.read_at(&read_fd, 3 * chunk_size as u64, chunk_size).unwrap();

        let mut state = CopyEngineState {
            buffers: [active, Chunk::alloc(chunk_size)],
            active_index: 0,
            in_offset: 4 * chunk_size as u64,
            out_offset: 3 * chunk_size as u64,
            end_out_offset: total as u64,
            read_dev_size: total as u64,
            write_dev_size: total as u64,
            reluksifying: false,
        };

        let shutdown = ShutdownFlag::bare();
        shutdown.request();
        let mut stats = ProgressStats::start(state.out_offset);

        let result = copy_engine::run(&mut state, &read_fd, &write_fd, &mut resume_file, &shutdown, &mut stats).unwrap();
        assert_eq!(result, CopyResult::Resumable);
        assert_eq!(state.out_offset, 3 * chunk_size as u64);
    }

    // Phase 2: reconstruct state the way the controller does when `--resume`
    // is given, and drive the copy to completion.
    {
        let (record, active) = ResumeRecord::read(&mut resume_file, chunk_size, total as u64, total as u64, false, true).unwrap();
        assert_eq!(record.out_offset, 3 * chunk_size as u64);
        assert_eq!(active.used(), chunk_size);

        let read_fd = open_rw(&src_path);
        let write_fd = open_rw(&dst_path);

        let in_offset = active.used() as u64 + record.out_offset;
        let mut state = CopyEngineState {
            buffers: [active, Chunk::alloc(chunk_size)],
            active_index: 0,
            in_offset,
            out_offset: record.out_offset,
            end_out_offset: total as u64,
            read_dev_size: total as u64,
            write_dev_size: total as u64,
            reluksifying: false,
        };

        let shutdown = ShutdownFlag::bare();
        let mut stats = ProgressStats::start(state.out_offset);

        let result = copy_engine::run(&mut state, &read_fd, &write_fd, &mut resume_file, &shutdown, &mut stats).unwrap();
        assert_eq!(result, CopyResult::Finished);
    }

    let written = std::fs::read(&dst_path).unwrap();
    assert_eq!(written, data);
}

#[test]
fn write_failure_on_readonly_device_leaves_a_valid_resume_record() {
    let chunk_size = 64 * 1024;
    let total = 4 * chunk_size;
    let data = pseudo_random_stream(5, total);

    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src");
    std::fs::write(&src_path, &data).unwrap();

    let dst_path = dir.path().join("dst");
    File::create(&dst_path).unwrap().set_len(total as u64).unwrap();

    let resume_path = dir.path().join("resume.bin");
    let mut resume_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&resume_path)
        .unwrap();

    let read_fd = open_rw(&src_path);
    let write_fd = File::open(&dst_path).unwrap(); // read-only: first write_at must fail

    let mut active = Chunk::alloc(chunk_size);
    active.read_at(&read_fd, 0, chunk_size).unwrap();

    let mut state = CopyEngineState {
        buffers: [active, Chunk::alloc(chunk_size)],
        active_index: 0,
        in_offset: chunk_size as u64,
        out_offset: 0,
        end_out_offset: total as u64,
        read_dev_size: total as u64,
        write_dev_size: total as u64,
        reluksifying: false,
    };

    let shutdown = ShutdownFlag::bare();
    let mut stats = ProgressStats::start(0);

    let result = copy_engine::run(&mut state, &read_fd, &write_fd, &mut resume_file, &shutdown, &mut stats).unwrap();
    assert_eq!(result, CopyResult::Resumable);
    assert_eq!(state.out_offset, 0);

    let (record, active) = ResumeRecord::read(&mut resume_file, chunk_size, total as u64, total as u64, false, true).unwrap();
    assert_eq!(record.out_offset, 0);
    assert_eq!(active.as_slice(), &data[..chunk_size]);
}
