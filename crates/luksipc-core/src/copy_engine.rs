//! The two-cursor, double-buffered copy loop. The read cursor runs at most
//! one chunk ahead of the write cursor; this is what makes overwriting the
//! raw device in place, through a mapper pointing slightly further into
//! it, safe.

use std::fs::File;

use crate::chunk::Chunk;
use crate::error::{ChunkError, ResumeError};
use crate::resume::ResumeRecord;
use crate::signal::ShutdownFlag;
use crate::stats::ProgressStats;

#[derive(Debug, PartialEq, Eq)]
pub enum CopyResult {
    Finished,
    Resumable,
    ResumeWriteFailed,
}

pub struct CopyEngineState {
    pub buffers: [Chunk; 2],
    pub active_index: usize,
    pub in_offset: u64,
    pub out_offset: u64,
    pub end_out_offset: u64,
    pub read_dev_size: u64,
    pub write_dev_size: u64,
    pub reluksifying: bool,
}

impl CopyEngineState {
    fn unused_index(&self) -> usize {
        1 - self.active_index
    }

    fn remaining_bytes(&self) -> u64 {
        self.end_out_offset.saturating_sub(self.out_offset)
    }
}

/// Runs the copy loop to completion or until a graceful shutdown is
/// requested (via `shutdown` or an I/O error), writing the resume record at
/// that point.
pub fn run(
    state: &mut CopyEngineState,
    read_fd: &File,
    write_fd: &File,
    resume_file: &mut File,
    shutdown: &ShutdownFlag,
    stats: &mut ProgressStats,
) -> Result<CopyResult, ChunkError> {
    tracing::info!(
        in_offset = state.in_offset,
        out_offset = state.out_offset,
        "starting copying of data"
    );

    loop {
        let unused = state.unused_index();
        let active_used = state.buffers[state.active_index].used() as u64;
        let headroom = state.remaining_bytes().saturating_sub(active_used);
        let capacity = state.buffers[unused].capacity() as u64;
        let bytes_to_read = headroom.min(capacity);

        let mut read_error = false;
        if bytes_to_read > 0 {
            match state.buffers[unused].read_at(read_fd, state.in_offset, bytes_to_read as usize) {
                Ok(n) if n > 0 => {
                    state.in_offset += n as u64;
                }
                Ok(_) => {
                    tracing::warn!(
                        in_offset = state.in_offset,
                        remaining = state.remaining_bytes(),
                        "read hit EOF before expected end of device"
                    );
                }
                Err(e) => {
                    tracing::error!(in_offset = state.in_offset, error = %e, "error reading from device, will shut down");
                    read_error = true;
                }
            }
        }

        if read_error || shutdown.requested() {
            tracing::info!("gracefully shutting down");
            return Ok(issue_graceful_shutdown(state, resume_file));
        }

        let active_used = state.buffers[state.active_index].used() as u64;
        if state.remaining_bytes() < active_used {
            state.buffers[state.active_index].set_used(state.remaining_bytes() as usize);
        }

        match state.buffers[state.active_index].write_at(write_fd, state.out_offset) {
            Ok(n) if n > 0 => {
                state.out_offset += n as u64;
                stats.record_copied(n as u64);
                stats.maybe_show(state.out_offset, state.end_out_offset);

                if state.out_offset == state.end_out_offset {
                    tracing::info!("disk copy completed successfully");
                    return Ok(CopyResult::Finished);
                }

                state.buffers[state.active_index].set_used(0);
                state.active_index = unused;
            }
            Ok(_) => {
                // Nothing written and not yet finished; treat as a shutdown
                // trigger rather than spinning.
                tracing::error!(out_offset = state.out_offset, "write transferred zero bytes before completion");
                return Ok(issue_graceful_shutdown(state, resume_file));
            }
            Err(e) => {
                tracing::error!(out_offset = state.out_offset, error = %e, "error writing to device, shutting down");
                return Ok(issue_graceful_shutdown(state, resume_file));
            }
        }
    }
}

fn issue_graceful_shutdown(state: &CopyEngineState, resume_file: &mut File) -> CopyResult {
    let record = ResumeRecord {
        out_offset: state.out_offset,
        read_dev_size: state.read_dev_size,
        write_dev_size: state.write_dev_size,
        reluksifying: state.reluksifying,
        active_used: state.buffers[state.active_index].used() as u32,
    };
    match record.write(resume_file, &state.buffers[state.active_index]) {
        Ok(()) => {
            tracing::info!("successfully wrote resume file");
            CopyResult::Resumable
        }
        Err(ResumeError::Io(e)) => {
            tracing::warn!(error = %e, "error writing resume file");
            CopyResult::ResumeWriteFailed
        }
        Err(e) => {
            tracing::warn!(error = %e, "error writing resume file");
            CopyResult::ResumeWriteFailed
        }
    }
}
