//! Blocking file I/O on top of the machine's asynchronous requests.
//!
//! Every request suspends the calling thread until the machine reports
//! completion through [`Kernel::io_complete`]. Reads and writes are staged
//! through a buffer in the shared pool and split into chunks of at most
//! `io_chunk_size` bytes; a thread that cannot get a buffer first waits on
//! the shared pool like any other memory waiter.

use crate::error::KernelError;
use crate::thread::tcb::WaitReason;
use crate::thread::ScheduleMode;
use crate::types::{Completion, IdKind, ThreadId};
use crate::Kernel;
use log::{debug, error, trace};
use spindle_machine::{
    Address, IoRequest, IoToken, Machine, OpenFlags, Whence, IO_ERR_FAULT,
};

#[derive(Debug, Clone)]
pub(crate) enum TransferKind {
    /// Open, seek and close: one request, no data
    Control(IoRequest),
    Read {
        fd: i32,
        destination: Address,
        len: usize,
    },
    Write {
        fd: i32,
        source: Address,
        len: usize,
    },
}

/// An in-flight request and the thread blocked on it
#[derive(Debug)]
pub(crate) struct IoTransfer {
    pub thread: ThreadId,
    pub kind: TransferKind,
    /// Staging buffer in the shared pool, once granted
    pub buffer: Option<Address>,
    pub transferred: usize,
    /// Length of the chunk currently with the machine
    pub chunk: usize,
}

impl IoTransfer {
    fn total(&self) -> usize {
        match self.kind {
            TransferKind::Control(_) => 0,
            TransferKind::Read { len, .. } | TransferKind::Write { len, .. } => len,
        }
    }

    fn moves_data(&self) -> bool {
        !matches!(self.kind, TransferKind::Control(_))
    }

    /// Bytes moved so far, as reported to the thread
    fn transferred_count(&self) -> i32 {
        i32::try_from(self.transferred).unwrap_or(i32::MAX)
    }
}

/// Completions carry byte counts as `i32`, so longer transfers are refused.
fn check_transfer_len(len: usize) -> Result<(), KernelError> {
    if i32::try_from(len).is_err() {
        return Err(KernelError::InvalidArgument(format!(
            "transfer of {} bytes exceeds {}",
            len,
            i32::MAX
        )));
    }
    Ok(())
}

/// Split a completion value into a byte count or descriptor, or the error
/// code the machine reported.
pub fn io_status(result: i32) -> Result<usize, KernelError> {
    usize::try_from(result).map_err(|_| KernelError::Io(result))
}

impl<M: Machine> Kernel<M> {
    /// Open `path`. Completes with the new descriptor.
    pub fn open_file(
        &mut self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Completion<i32>, KernelError> {
        self.start_control(IoRequest::Open {
            path: path.to_string(),
            flags,
            mode,
        })
    }

    /// Read up to `len` bytes from `fd` into memory at `destination`.
    /// Completes with the number of bytes read; short at end of file.
    pub fn read_file(
        &mut self,
        fd: i32,
        destination: Address,
        len: usize,
    ) -> Result<Completion<i32>, KernelError> {
        check_transfer_len(len)?;
        if len == 0 {
            return Ok(Completion::Done(0));
        }
        self.start_transfer(TransferKind::Read {
            fd,
            destination,
            len,
        })
    }

    /// Write `len` bytes from memory at `source` to `fd`.
    pub fn write_file(
        &mut self,
        fd: i32,
        source: Address,
        len: usize,
    ) -> Result<Completion<i32>, KernelError> {
        check_transfer_len(len)?;
        if len == 0 {
            return Ok(Completion::Done(0));
        }
        self.start_transfer(TransferKind::Write { fd, source, len })
    }

    /// Completes with the new offset.
    pub fn seek_file(
        &mut self,
        fd: i32,
        offset: i64,
        whence: Whence,
    ) -> Result<Completion<i32>, KernelError> {
        self.start_control(IoRequest::Seek { fd, offset, whence })
    }

    pub fn close_file(&mut self, fd: i32) -> Result<Completion<i32>, KernelError> {
        self.start_control(IoRequest::Close { fd })
    }

    /// Consume the completion value stored for `thread` by its last request.
    pub fn take_io_result(&mut self, thread: ThreadId) -> Result<Option<i32>, KernelError> {
        Ok(self.threads.get_mut(thread)?.io_result.take())
    }

    /// The machine finished the request behind `token`.
    pub fn io_complete(&mut self, token: IoToken, result: i32) -> Result<(), KernelError> {
        let Some(mut transfer) = self.transfers.remove(&token) else {
            debug!("Ignoring completion for unknown request {}", token.val());
            return Ok(());
        };
        trace!("Request {} completed with {}", token.val(), result);

        let alive = self
            .threads
            .threads
            .get(&transfer.thread)
            .is_some_and(|tcb| tcb.io_token == Some(token));
        if !alive {
            debug!(
                "Thread {} is gone; dropping request {}",
                transfer.thread,
                token.val()
            );
            if let Some(buffer) = transfer.buffer {
                if self.release_io_buffer(buffer)? > 0 {
                    self.schedule(ScheduleMode::Strict)?;
                }
            }
            return Ok(());
        }

        if !transfer.moves_data() {
            self.finish_transfer(transfer, result)?;
            return self.schedule(ScheduleMode::Strict);
        }

        if result < 0 {
            let outcome = if transfer.transferred > 0 {
                transfer.transferred_count()
            } else {
                result
            };
            self.finish_transfer(transfer, outcome)?;
            return self.schedule(ScheduleMode::Strict);
        }

        let count = (result as usize).min(transfer.chunk);
        let destination = match transfer.kind {
            TransferKind::Read { destination, .. } => Some(destination),
            _ => None,
        };
        if let (Some(destination), Some(buffer)) = (destination, transfer.buffer) {
            if let Err(e) =
                self.machine
                    .copy_memory(destination + transfer.transferred, buffer, count)
            {
                error!("Copy out of I/O buffer failed: {}", e);
                self.finish_transfer(transfer, IO_ERR_FAULT)?;
                return self.schedule(ScheduleMode::Strict);
            }
        }
        transfer.transferred += count;

        if count == transfer.chunk && transfer.transferred < transfer.total() {
            self.transfers.insert(token, transfer);
            return self.submit_or_fail(token);
        }

        let total = transfer.transferred_count();
        self.finish_transfer(transfer, total)?;
        self.schedule(ScheduleMode::Strict)
    }

    /// True while `token` is a data transfer still waiting for its buffer.
    pub(crate) fn awaits_io_buffer(&self, token: IoToken) -> bool {
        self.transfers
            .get(&token)
            .is_some_and(|t| t.moves_data() && t.buffer.is_none())
    }

    /// The shared pool granted a staging buffer to a waiting transfer.
    pub(crate) fn attach_io_buffer(
        &mut self,
        token: IoToken,
        buffer: Address,
    ) -> Result<(), KernelError> {
        let transfer = self.transfer_mut(token)?;
        transfer.buffer = Some(buffer);
        let thread = transfer.thread;
        self.threads.rewait(thread, WaitReason::Io(token))?;
        self.submit_or_fail(token)
    }

    /// The thread behind `token` was terminated. A transfer still waiting
    /// for a buffer is dropped; one already with the machine is left for
    /// its completion to clean up.
    pub(crate) fn abandon_transfer(&mut self, token: IoToken) -> Result<(), KernelError> {
        if self.awaits_io_buffer(token) {
            self.transfers.remove(&token);
        }
        Ok(())
    }

    fn start_control(&mut self, request: IoRequest) -> Result<Completion<i32>, KernelError> {
        let (caller, _) = self.blocking_caller()?;
        let token = self.issue_token()?;
        self.transfers.insert(
            token,
            IoTransfer {
                thread: caller,
                kind: TransferKind::Control(request),
                buffer: None,
                transferred: 0,
                chunk: 0,
            },
        );
        if let Err(e) = self.submit_chunk(token) {
            self.transfers.remove(&token);
            return Err(e);
        }

        self.threads.get_mut(caller)?.io_token = Some(token);
        self.threads.block_current(WaitReason::Io(token), None)?;
        self.schedule(ScheduleMode::Strict)?;
        Ok(Completion::Blocked)
    }

    fn start_transfer(&mut self, kind: TransferKind) -> Result<Completion<i32>, KernelError> {
        let (caller, priority) = self.blocking_caller()?;
        let token = self.issue_token()?;
        let mut transfer = IoTransfer {
            thread: caller,
            kind,
            buffer: None,
            transferred: 0,
            chunk: 0,
        };
        let buffer_size = transfer.total().min(self.config.io_chunk_size);
        let shared = self.shared_pool;
        transfer.buffer = self.pool_mut(shared)?.allocate(buffer_size);
        let has_buffer = transfer.buffer.is_some();
        self.transfers.insert(token, transfer);

        if has_buffer {
            if let Err(e) = self.submit_chunk(token) {
                if let Some(transfer) = self.transfers.remove(&token) {
                    if let Some(buffer) = transfer.buffer {
                        self.pool_mut(shared)?.deallocate(buffer);
                    }
                }
                return Err(e);
            }
        }

        self.threads.get_mut(caller)?.io_token = Some(token);
        if has_buffer {
            self.threads.block_current(WaitReason::Io(token), None)?;
        } else {
            debug!(
                "Thread {} waiting for a {} byte I/O buffer",
                caller, buffer_size
            );
            self.pool_mut(shared)?
                .enqueue_waiter(caller, buffer_size, priority);
            self.threads.block_current(
                WaitReason::Memory {
                    pool: shared,
                    size: buffer_size,
                },
                None,
            )?;
        }
        self.schedule(ScheduleMode::Strict)?;
        Ok(Completion::Blocked)
    }

    /// Hand the next piece of `token`'s transfer to the machine.
    fn submit_chunk(&mut self, token: IoToken) -> Result<(), KernelError> {
        let chunk_size = self.config.io_chunk_size;
        let transfer = self.transfer_mut(token)?;
        let remaining = transfer.total() - transfer.transferred;
        let offset = transfer.transferred;

        let (request, staging) = match (&transfer.kind, transfer.buffer) {
            (TransferKind::Control(request), _) => (request.clone(), None),
            (&TransferKind::Read { fd, .. }, Some(buffer)) => {
                transfer.chunk = remaining.min(chunk_size);
                let len = transfer.chunk;
                (IoRequest::Read { fd, buffer, len }, None)
            }
            (&TransferKind::Write { fd, source, .. }, Some(buffer)) => {
                transfer.chunk = remaining.min(chunk_size);
                let len = transfer.chunk;
                (IoRequest::Write { fd, buffer, len }, Some((source + offset, buffer, len)))
            }
            (_, None) => {
                return Err(KernelError::InvalidState(format!(
                    "request {} has no buffer",
                    token.val()
                )))
            }
        };

        if let Some((source, buffer, len)) = staging {
            self.machine.copy_memory(buffer, source, len)?;
        }
        trace!("Submitting request {}: {:?}", token.val(), request);
        self.machine.submit_io(token, request)?;
        Ok(())
    }

    /// Submit the next chunk; if the machine refuses, end the transfer
    /// with a fault so the thread is not left waiting forever.
    fn submit_or_fail(&mut self, token: IoToken) -> Result<(), KernelError> {
        match self.submit_chunk(token) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Request {} failed to submit: {}", token.val(), e);
                let transfer = self
                    .transfers
                    .remove(&token)
                    .ok_or_else(|| KernelError::not_found(IdKind::IoRequest, token.val()))?;
                self.finish_transfer(transfer, IO_ERR_FAULT)?;
                self.schedule(ScheduleMode::Strict)
            }
        }
    }

    /// Free the buffer, store `result` and wake the thread. Does not reschedule.
    fn finish_transfer(&mut self, transfer: IoTransfer, result: i32) -> Result<(), KernelError> {
        if let Some(buffer) = transfer.buffer {
            self.release_io_buffer(buffer)?;
        }
        let tcb = self.threads.get_mut(transfer.thread)?;
        tcb.io_token = None;
        tcb.io_result = Some(result);
        self.threads.make_ready(transfer.thread)?;
        debug!("Thread {} I/O finished with {}", transfer.thread, result);
        Ok(())
    }

    fn release_io_buffer(&mut self, buffer: Address) -> Result<usize, KernelError> {
        let shared = self.shared_pool;
        self.pool_mut(shared)?.deallocate(buffer);
        self.signal_memory_release(shared)
    }

    fn issue_token(&mut self) -> Result<IoToken, KernelError> {
        let raw = self.io_tokens.issue_raw()?;
        IoToken::new(raw.get()).ok_or(KernelError::IdsExhausted(IdKind::IoRequest))
    }

    fn transfer_mut(&mut self, token: IoToken) -> Result<&mut IoTransfer, KernelError> {
        self.transfers
            .get_mut(&token)
            .ok_or_else(|| KernelError::not_found(IdKind::IoRequest, token.val()))
    }
}
