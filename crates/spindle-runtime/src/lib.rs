pub mod error;
pub mod loader;
pub mod script;

pub use error::RuntimeError;
pub use script::{Command, Line, Script};

use log::{debug, info};
use spindle_kernel::{
    Completion, Kernel, KernelConfig, KernelError, MutexId, PoolId, ThreadId, ThreadState,
};
use spindle_machine::{Address, Interrupt, InterruptHandler, Machine, SimConfig, SimMachine};
use std::collections::HashMap;
use std::path::Path;

/// Script run by `spindle demo`
pub const DEMO_SCRIPT: &str = include_str!("../scripts/demo.spin");

/// Simulated RAM left over for pools a script creates
const USER_MEMORY: usize = 0x10_0000;

/// Scripted threads never execute code of their own; the script speaks
/// for whichever of them is running.
fn script_thread(_: usize) {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Thread(ThreadId),
    Mutex(MutexId),
    Pool(PoolId),
    Buffer {
        pool: PoolId,
        address: Address,
        size: usize,
    },
    Value(i32),
}

pub struct Runtime {
    kernel: Kernel<SimMachine>,
    names: HashMap<String, Binding>,
    /// Blocked allocations, bound once the grant arrives
    pending_memory: HashMap<ThreadId, (String, PoolId, usize)>,
    /// Blocked file requests and the name their result is bound to
    pending_io: HashMap<ThreadId, Option<String>>,
    program: Option<Script>,
    transcript: Vec<String>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("transcript", &self.transcript)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(config: KernelConfig) -> Result<Self, RuntimeError> {
        let machine = SimMachine::new(SimConfig {
            memory_size: config.system_heap_size + config.shared_memory_size + USER_MEMORY,
            ..SimConfig::default()
        });
        let kernel = Kernel::new(machine, config)?;

        let mut names = HashMap::new();
        names.insert("main".to_string(), Binding::Thread(kernel.current_thread()));
        names.insert("idle".to_string(), Binding::Thread(kernel.idle_thread()));
        names.insert("system".to_string(), Binding::Pool(kernel.system_pool()));
        names.insert("shared".to_string(), Binding::Pool(kernel.shared_pool()));

        Ok(Self {
            kernel,
            names,
            pending_memory: HashMap::new(),
            pending_io: HashMap::new(),
            program: None,
            transcript: Vec::new(),
        })
    }

    pub fn kernel(&self) -> &Kernel<SimMachine> {
        &self.kernel
    }

    pub fn load_program(&mut self, path: &Path) -> Result<(), RuntimeError> {
        self.program = Some(loader::ScriptLoader::load_file(path)?);
        Ok(())
    }

    pub fn load_source(&mut self, source: &str) -> Result<(), RuntimeError> {
        self.program = Some(Script::parse(source)?);
        Ok(())
    }

    /// Execute the loaded script line by line, stopping at the first error.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let script = self.program.take().ok_or(RuntimeError::NoProgram)?;
        for line in &script.lines {
            debug!("line {}: {:?}", line.number, line.command);
            self.execute(line)?;
            self.collect_results();
        }
        info!(
            "Script finished after {} commands and {} ticks",
            script.len(),
            self.kernel.ticks()
        );
        Ok(())
    }

    /// Output of `status` commands
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    fn execute(&mut self, line: &Line) -> Result<(), RuntimeError> {
        let n = line.number;
        let k = move |source: KernelError| RuntimeError::Kernel { line: n, source };
        let caller = self.kernel.current_thread();

        match &line.command {
            Command::Spawn {
                name,
                priority,
                stack,
            } => {
                let argument = self.names.len();
                let thread = self
                    .kernel
                    .create_thread(script_thread, argument, *stack, *priority)
                    .map_err(k)?;
                self.names.insert(name.clone(), Binding::Thread(thread));
            }
            Command::Sleep(ticks) => self.kernel.sleep_current(*ticks).map_err(k)?,
            Command::Yield => self.kernel.sleep_current(0).map_err(k)?,
            Command::Tick(count) => {
                for _ in 0..*count {
                    self.kernel.handle_interrupt(Interrupt::Timer).map_err(k)?;
                }
            }
            Command::Exit => self.kernel.exit_current().map_err(k)?,
            Command::Kill(name) => {
                let thread = self.thread(n, name)?;
                self.kernel.terminate(thread).map_err(k)?;
            }
            Command::Reap(name) => {
                let thread = self.thread(n, name)?;
                self.kernel.delete_dead(thread).map_err(k)?;
            }

            Command::Mutex(name) => {
                let mutex = self.kernel.create_mutex().map_err(k)?;
                self.names.insert(name.clone(), Binding::Mutex(mutex));
            }
            Command::Lock { mutex, timeout } => {
                let mutex = self.mutex(n, mutex)?;
                if self.kernel.lock_mutex(mutex, *timeout).map_err(k)?.is_blocked() {
                    debug!("Thread {} blocked on mutex {}", caller, mutex);
                }
            }
            Command::Unlock(name) => {
                let mutex = self.mutex(n, name)?;
                self.kernel.release_mutex(mutex).map_err(k)?;
            }
            Command::DeleteMutex(name) => {
                let mutex = self.mutex(n, name)?;
                self.kernel.delete_mutex(mutex).map_err(k)?;
            }

            Command::Pool { name, size } => {
                let base = self
                    .kernel
                    .machine_mut()
                    .map_memory(*size)
                    .map_err(|e| k(e.into()))?;
                let pool = self.kernel.create_pool(base, *size).map_err(k)?;
                self.names.insert(name.clone(), Binding::Pool(pool));
            }
            Command::Alloc { name, pool, size } => {
                let pool = self.pool(n, pool)?;
                match self.kernel.wait_on_memory(*size, pool).map_err(k)? {
                    Completion::Done(address) => {
                        self.names.insert(
                            name.clone(),
                            Binding::Buffer {
                                pool,
                                address,
                                size: *size,
                            },
                        );
                    }
                    Completion::Blocked => {
                        self.pending_memory
                            .insert(caller, (name.clone(), pool, *size));
                    }
                }
            }
            Command::Free(name) => {
                let (pool, address, _) = self.buffer(n, name)?;
                self.kernel.deallocate(pool, address).map_err(k)?;
            }
            Command::DeletePool(name) => {
                let pool = self.pool(n, name)?;
                self.kernel.delete_pool(pool).map_err(k)?;
            }

            Command::File { path, contents } => {
                self.kernel
                    .machine_mut()
                    .add_file(path, contents.as_bytes());
            }
            Command::Poke { buffer, text } => {
                let (_, address, size) = self.buffer(n, buffer)?;
                self.check_fits(n, text.len(), size)?;
                self.kernel
                    .machine_mut()
                    .memory_mut()
                    .write(address, text.as_bytes())
                    .map_err(|source| RuntimeError::Memory { line: n, source })?;
            }
            Command::Open { name, path, flags } => {
                let result = self.kernel.open_file(path, *flags, 0o644).map_err(k)?;
                self.io_started(caller, Some(name), result);
            }
            Command::Read {
                name,
                fd,
                buffer,
                len,
            } => {
                let fd = self.value(n, fd)?;
                let (_, address, size) = self.buffer(n, buffer)?;
                self.check_fits(n, *len, size)?;
                let result = self.kernel.read_file(fd, address, *len).map_err(k)?;
                self.io_started(caller, Some(name), result);
            }
            Command::Write {
                name,
                fd,
                buffer,
                len,
            } => {
                let fd = self.value(n, fd)?;
                let (_, address, size) = self.buffer(n, buffer)?;
                self.check_fits(n, *len, size)?;
                let result = self.kernel.write_file(fd, address, *len).map_err(k)?;
                self.io_started(caller, Some(name), result);
            }
            Command::Seek {
                name,
                fd,
                offset,
                whence,
            } => {
                let fd = self.value(n, fd)?;
                let result = self.kernel.seek_file(fd, *offset, *whence).map_err(k)?;
                self.io_started(caller, Some(name), result);
            }
            Command::Close(fd) => {
                let fd = self.value(n, fd)?;
                let result = self.kernel.close_file(fd).map_err(k)?;
                self.io_started(caller, None, result);
            }
            Command::Io(count) => {
                for _ in 0..*count {
                    let Some((token, result)) = self.kernel.machine_mut().complete_next_io()
                    else {
                        break;
                    };
                    self.kernel
                        .handle_interrupt(Interrupt::IoComplete { token, result })
                        .map_err(k)?;
                }
            }

            Command::Expect { thread, state } => {
                let id = self.thread(n, thread)?;
                let actual = self.kernel.thread_state(id).map_err(k)?;
                if actual != *state {
                    return Err(self.failed(n, format!("{} is {:?}, not {:?}", thread, actual, state)));
                }
            }
            Command::ExpectOwner { mutex, owner } => {
                let id = self.mutex(n, mutex)?;
                let expected = match owner {
                    Some(name) => Some(self.thread(n, name)?),
                    None => None,
                };
                let actual = self.kernel.mutex_owner(id).map_err(k)?;
                if actual != expected {
                    let shown = actual.map_or("none".to_string(), |t| self.name_of(t));
                    return Err(self.failed(n, format!("{} is owned by {}", mutex, shown)));
                }
            }
            Command::ExpectFree { pool, bytes } => {
                let id = self.pool(n, pool)?;
                let free = self.kernel.pool_unallocated(id).map_err(k)?;
                if free != *bytes {
                    return Err(self.failed(n, format!("{} has {} bytes free", pool, free)));
                }
            }
            Command::ExpectValue { name, value } => {
                let actual = self.value(n, name)?;
                if i64::from(actual) != *value {
                    return Err(self.failed(n, format!("{} is {}", name, actual)));
                }
            }
            Command::ExpectText { buffer, text } => {
                let (_, address, size) = self.buffer(n, buffer)?;
                self.check_fits(n, text.len(), size)?;
                let bytes = self
                    .kernel
                    .machine()
                    .memory()
                    .slice(address, text.len())
                    .map_err(|source| RuntimeError::Memory { line: n, source })?;
                if bytes != text.as_bytes() {
                    let found = String::from_utf8_lossy(bytes).into_owned();
                    return Err(self.failed(n, format!("{} holds '{}'", buffer, found)));
                }
            }
            Command::Status => self.status(),
        }
        Ok(())
    }

    /// Bind results that blocked threads received since the last command.
    fn collect_results(&mut self) {
        let kernel = &mut self.kernel;
        let names = &mut self.names;

        self.pending_memory
            .retain(|&thread, (name, pool, size)| match kernel.take_memory_result(thread) {
                Ok(Some(address)) => {
                    names.insert(
                        name.clone(),
                        Binding::Buffer {
                            pool: *pool,
                            address,
                            size: *size,
                        },
                    );
                    false
                }
                Ok(None) => kernel
                    .thread_state(thread)
                    .is_ok_and(|state| state != ThreadState::Dead),
                Err(_) => false,
            });

        self.pending_io.retain(|&thread, name| {
            match kernel.thread(thread).map(|tcb| tcb.io_token.is_some()) {
                Ok(true) => true,
                Ok(false) => {
                    if let (Ok(Some(value)), Some(name)) = (kernel.take_io_result(thread), name) {
                        names.insert(name.clone(), Binding::Value(value));
                    }
                    false
                }
                Err(_) => false,
            }
        });
    }

    fn io_started(&mut self, caller: ThreadId, name: Option<&String>, result: Completion<i32>) {
        match result {
            Completion::Done(value) => {
                if let Some(name) = name {
                    self.names.insert(name.clone(), Binding::Value(value));
                }
            }
            Completion::Blocked => {
                self.pending_io.insert(caller, name.cloned());
            }
        }
    }

    fn status(&mut self) {
        let mut lines = vec![format!("tick {}", self.kernel.ticks())];
        for tcb in self.kernel.threads() {
            lines.push(format!(
                "  {:<10} #{:<3} {:<6} {:?}",
                self.name_of(tcb.id),
                tcb.id.val(),
                tcb.priority,
                tcb.state
            ));
        }
        for line in &lines {
            info!("{}", line);
        }
        self.transcript.extend(lines);
    }

    fn lookup(&self, line: usize, name: &str) -> Result<Binding, RuntimeError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownName {
                line,
                name: name.to_string(),
            })
    }

    fn wrong_kind(line: usize, name: &str, expected: &'static str) -> RuntimeError {
        RuntimeError::WrongKind {
            line,
            name: name.to_string(),
            expected,
        }
    }

    fn thread(&self, line: usize, name: &str) -> Result<ThreadId, RuntimeError> {
        match self.lookup(line, name)? {
            Binding::Thread(thread) => Ok(thread),
            _ => Err(Self::wrong_kind(line, name, "thread")),
        }
    }

    fn mutex(&self, line: usize, name: &str) -> Result<MutexId, RuntimeError> {
        match self.lookup(line, name)? {
            Binding::Mutex(mutex) => Ok(mutex),
            _ => Err(Self::wrong_kind(line, name, "mutex")),
        }
    }

    fn pool(&self, line: usize, name: &str) -> Result<PoolId, RuntimeError> {
        match self.lookup(line, name)? {
            Binding::Pool(pool) => Ok(pool),
            _ => Err(Self::wrong_kind(line, name, "pool")),
        }
    }

    fn buffer(&self, line: usize, name: &str) -> Result<(PoolId, Address, usize), RuntimeError> {
        match self.lookup(line, name)? {
            Binding::Buffer {
                pool,
                address,
                size,
            } => Ok((pool, address, size)),
            _ => Err(Self::wrong_kind(line, name, "buffer")),
        }
    }

    /// A literal number or a name bound to an I/O result
    fn value(&self, line: usize, name: &str) -> Result<i32, RuntimeError> {
        if let Ok(literal) = name.parse() {
            return Ok(literal);
        }
        match self.lookup(line, name)? {
            Binding::Value(value) => Ok(value),
            _ => Err(Self::wrong_kind(line, name, "value")),
        }
    }

    fn check_fits(&self, line: usize, len: usize, size: usize) -> Result<(), RuntimeError> {
        if len > size {
            return Err(RuntimeError::Parse {
                line,
                message: format!("{} bytes do not fit in a {} byte buffer", len, size),
            });
        }
        Ok(())
    }

    fn name_of(&self, thread: ThreadId) -> String {
        self.names
            .iter()
            .filter(|(_, b)| **b == Binding::Thread(thread))
            .map(|(name, _)| name.clone())
            .min()
            .unwrap_or_else(|| format!("#{}", thread))
    }

    fn failed(&self, line: usize, message: String) -> RuntimeError {
        RuntimeError::Expectation { line, message }
    }
}

/// Boot a runtime with `config` and run `source` on it.
pub fn run_source(config: KernelConfig, source: &str) -> Result<Runtime, RuntimeError> {
    let mut runtime = Runtime::new(config)?;
    runtime.load_source(source)?;
    runtime.run()?;
    Ok(runtime)
}
