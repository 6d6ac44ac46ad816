use crate::context::{ContextRef, StackRegion, ThreadEntry};
use crate::error::MachineError;
use crate::io::{
    IoRequest, IoToken, OpenFlags, Whence, IO_ERR_BAD_DESCRIPTOR, IO_ERR_FAULT, IO_ERR_INVALID,
    IO_ERR_NOT_FOUND,
};
use crate::memory::{Address, Memory};
use crate::Machine;
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};

pub struct SimConfig {
    pub memory_base: Address,
    pub memory_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory_base: Address::new(0x1000_0000),
            memory_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct SimContext {
    entry: Option<(ThreadEntry, usize)>,
    stack_top: Option<Address>,
}

struct OpenFile {
    path: String,
    offset: usize,
    flags: OpenFlags,
}

/// Deterministic host-side machine.
///
/// Context switches are recorded instead of performed, timer ticks are
/// delivered by whoever drives the kernel, and file requests queue until
/// `complete_next_io` runs them against an in-memory file table.
pub struct SimMachine {
    memory: Memory,
    next_free: Address,
    contexts: HashMap<ContextRef, SimContext>,
    next_context: u32,
    current: ContextRef,
    switches: Vec<(ContextRef, ContextRef)>,
    timer_interval: Option<u64>,
    io_registered: bool,
    files: HashMap<String, Vec<u8>>,
    open_files: HashMap<i32, OpenFile>,
    next_fd: i32,
    pending_io: VecDeque<(IoToken, IoRequest)>,
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimMachine {
    pub fn new(config: SimConfig) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            ContextRef::BOOT,
            SimContext {
                entry: None,
                stack_top: None,
            },
        );

        Self {
            memory: Memory::new(config.memory_base, config.memory_size),
            next_free: config.memory_base,
            contexts,
            next_context: ContextRef::BOOT.val() + 1,
            current: ContextRef::BOOT,
            switches: Vec::new(),
            timer_interval: None,
            io_registered: false,
            files: HashMap::new(),
            open_files: HashMap::new(),
            // 0-2 are reserved for the standard streams
            next_fd: 3,
            pending_io: VecDeque::new(),
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Every switch performed so far, oldest first
    pub fn switch_log(&self) -> &[(ContextRef, ContextRef)] {
        &self.switches
    }

    pub fn timer_interval(&self) -> Option<u64> {
        self.timer_interval
    }

    pub fn io_registered(&self) -> bool {
        self.io_registered
    }

    pub fn context_entry(&self, context: ContextRef) -> Option<(ThreadEntry, usize)> {
        self.contexts.get(&context).and_then(|c| c.entry)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn add_file(&mut self, path: &str, contents: &[u8]) {
        self.files.insert(path.to_string(), contents.to_vec());
    }

    pub fn file_contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|f| f.as_slice())
    }

    pub fn pending_io_count(&self) -> usize {
        self.pending_io.len()
    }

    /// Execute the oldest queued request and return its completion.
    pub fn complete_next_io(&mut self) -> Option<(IoToken, i32)> {
        let (token, request) = self.pending_io.pop_front()?;
        let result = self.execute(request);
        debug!("I/O {:?} completed with {}", token, result);
        Some((token, result))
    }

    fn execute(&mut self, request: IoRequest) -> i32 {
        match request {
            IoRequest::Open { path, flags, mode } => {
                trace!("open {} {:?} mode={:o}", path, flags, mode);
                if !self.files.contains_key(&path) {
                    if !flags.contains(OpenFlags::CREATE) {
                        return IO_ERR_NOT_FOUND;
                    }
                    self.files.insert(path.clone(), Vec::new());
                }
                let Some(data) = self.files.get_mut(&path) else {
                    return IO_ERR_NOT_FOUND;
                };
                if flags.contains(OpenFlags::TRUNCATE) {
                    data.clear();
                }
                let offset = if flags.contains(OpenFlags::APPEND) {
                    data.len()
                } else {
                    0
                };
                let fd = self.next_fd;
                self.next_fd += 1;
                self.open_files
                    .insert(fd, OpenFile { path, offset, flags });
                fd
            }
            IoRequest::Read { fd, buffer, len } => {
                let Some(file) = self.open_files.get_mut(&fd) else {
                    return IO_ERR_BAD_DESCRIPTOR;
                };
                let Some(data) = self.files.get(&file.path) else {
                    return IO_ERR_BAD_DESCRIPTOR;
                };
                let start = file.offset.min(data.len());
                let count = len.min(data.len() - start);
                if self
                    .memory
                    .write(buffer, &data[start..start + count])
                    .is_err()
                {
                    return IO_ERR_FAULT;
                }
                file.offset = start + count;
                count as i32
            }
            IoRequest::Write { fd, buffer, len } => {
                let Some(file) = self.open_files.get_mut(&fd) else {
                    return IO_ERR_BAD_DESCRIPTOR;
                };
                if !file.flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND) {
                    return IO_ERR_BAD_DESCRIPTOR;
                }
                let Ok(bytes) = self.memory.slice(buffer, len) else {
                    return IO_ERR_FAULT;
                };
                let Some(data) = self.files.get_mut(&file.path) else {
                    return IO_ERR_BAD_DESCRIPTOR;
                };
                let end = file.offset + len;
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[file.offset..end].copy_from_slice(bytes);
                file.offset = end;
                len as i32
            }
            IoRequest::Seek { fd, offset, whence } => {
                let Some(file) = self.open_files.get_mut(&fd) else {
                    return IO_ERR_BAD_DESCRIPTOR;
                };
                let size = self.files.get(&file.path).map_or(0, |d| d.len());
                let origin = match whence {
                    Whence::Start => 0,
                    Whence::Current => file.offset as i64,
                    Whence::End => size as i64,
                };
                match origin.checked_add(offset) {
                    Some(target) if target >= 0 && target <= i32::MAX as i64 => {
                        file.offset = target as usize;
                        target as i32
                    }
                    _ => IO_ERR_INVALID,
                }
            }
            IoRequest::Close { fd } => match self.open_files.remove(&fd) {
                Some(_) => 0,
                None => IO_ERR_BAD_DESCRIPTOR,
            },
        }
    }
}

impl Machine for SimMachine {
    fn map_memory(&mut self, size: usize) -> Result<Address, MachineError> {
        let used = self
            .next_free
            .offset_from(self.memory.base())
            .unwrap_or(0);
        let available = self.memory.size() - used;
        if size > available {
            return Err(MachineError::OutOfMemory {
                requested: size,
                available,
            });
        }
        let addr = self.next_free;
        self.next_free = addr + size;
        debug!("Mapped {} bytes at {}", size, addr);
        Ok(addr)
    }

    fn create_context(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack: &StackRegion,
    ) -> Result<ContextRef, MachineError> {
        let context =
            ContextRef::new(self.next_context).ok_or(MachineError::ContextsExhausted)?;
        self.next_context += 1;
        self.contexts.insert(
            context,
            SimContext {
                entry: Some((entry, argument)),
                stack_top: Some(stack.top()),
            },
        );
        trace!("Created context {:?} with stack top {}", context, stack.top());
        Ok(context)
    }

    fn current_context(&self) -> ContextRef {
        self.current
    }

    fn switch_context(&mut self, from: ContextRef, to: ContextRef) -> Result<(), MachineError> {
        if !self.contexts.contains_key(&to) {
            return Err(MachineError::UnknownContext(to));
        }
        trace!("switch {:?} -> {:?}", from, to);
        self.switches.push((from, to));
        self.current = to;
        Ok(())
    }

    fn release_context(&mut self, context: ContextRef) {
        if let Some(ctx) = self.contexts.remove(&context) {
            trace!("Released context {:?} ({:?})", context, ctx.stack_top);
        }
    }

    fn register_timer(&mut self, interval_ms: u64) -> Result<(), MachineError> {
        if interval_ms == 0 {
            return Err(MachineError::InvalidTimerInterval);
        }
        self.timer_interval = Some(interval_ms);
        Ok(())
    }

    fn register_io_completion(&mut self) -> Result<(), MachineError> {
        self.io_registered = true;
        Ok(())
    }

    fn copy_memory(&mut self, dst: Address, src: Address, len: usize) -> Result<(), MachineError> {
        self.memory.copy(dst, src, len)?;
        Ok(())
    }

    fn submit_io(&mut self, token: IoToken, request: IoRequest) -> Result<(), MachineError> {
        trace!("submit {:?}: {:?}", token, request);
        self.pending_io.push_back((token, request));
        Ok(())
    }
}
