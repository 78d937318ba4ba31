//! Host functions available to behavior modules.
//!
//! Everything is registered under the `"loom"` import namespace. The surface
//! is deliberately small: behaviors can read the clock and write to the
//! engine's log. World mutation goes through the engine, not through imports.
//!
//! # Host Functions
//!
//! - `tick_number() -> i64`
//! - `sim_time() -> f64`
//! - `log(level: i32, msg_ptr: i32, msg_len: i32)` (needs an exported
//!   `memory`)

use wasmtime::{Caller, Linker, StoreLimits};

// ---------------------------------------------------------------------------
// HostState
// ---------------------------------------------------------------------------

/// Per-instance state living inside the Wasmtime store.
pub struct HostState {
    /// Memory cap enforced through the store's resource limiter.
    pub(crate) limits: StoreLimits,

    /// Tick number of the current `update()` call.
    pub tick: u64,

    /// Simulation time in seconds of the current `update()` call.
    pub sim_time: f64,

    /// Host calls made during the current tick. Reset by
    /// [`begin_tick`](Self::begin_tick).
    pub host_call_count: u32,
}

impl HostState {
    pub(crate) fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            tick: 0,
            sim_time: 0.0,
            host_call_count: 0,
        }
    }

    pub fn begin_tick(&mut self, tick: u64, sim_time: f64) {
        self.tick = tick;
        self.sim_time = sim_time;
        self.host_call_count = 0;
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("tick", &self.tick)
            .field("sim_time", &self.sim_time)
            .field("host_call_count", &self.host_call_count)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Host function registration
// ---------------------------------------------------------------------------

/// Register all host functions under the `"loom"` namespace.
///
/// # Errors
///
/// Only on a Wasmtime API mismatch.
pub fn register_host_api(linker: &mut Linker<HostState>) -> Result<(), anyhow::Error> {
    linker.func_wrap("loom", "tick_number", host_tick_number)?;
    linker.func_wrap("loom", "sim_time", host_sim_time)?;
    linker.func_wrap("loom", "log", host_log)?;
    Ok(())
}

/// Read a UTF-8 string from the caller's exported `memory`.
fn read_wasm_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<String, String> {
    let memory = caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| {
            "WASM module must export 'memory' to pass strings to the host -- \
             add `(memory (export \"memory\") 1)` to your module"
                .to_owned()
        })?;

    let data = memory.data(&caller);
    let start = ptr as usize;
    let end = start.saturating_add(len as usize);

    if ptr < 0 || len < 0 || end > data.len() {
        return Err(format!(
            "WASM string read out of bounds: ptr={ptr}, len={len}, memory_size={}",
            data.len()
        ));
    }

    String::from_utf8(data[start..end].to_vec())
        .map_err(|e| format!("WASM string at ptr={ptr} len={len} is not valid UTF-8: {e}"))
}

fn host_tick_number(mut caller: Caller<'_, HostState>) -> i64 {
    caller.data_mut().host_call_count += 1;
    caller.data().tick as i64
}

fn host_sim_time(mut caller: Caller<'_, HostState>) -> f64 {
    caller.data_mut().host_call_count += 1;
    caller.data().sim_time
}

/// `log(level, msg_ptr, msg_len)`: 0 trace, 1 debug, 2 info, 3 warn, 4 error.
fn host_log(mut caller: Caller<'_, HostState>, level: i32, msg_ptr: i32, msg_len: i32) {
    caller.data_mut().host_call_count += 1;

    let msg = match read_wasm_string(&mut caller, msg_ptr, msg_len) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "log: failed to read message from WASM memory");
            return;
        }
    };

    let tick = caller.data().tick;
    match level {
        0 => tracing::trace!(source = "wasm", tick, "{msg}"),
        1 => tracing::debug!(source = "wasm", tick, "{msg}"),
        2 => tracing::info!(source = "wasm", tick, "{msg}"),
        3 => tracing::warn!(source = "wasm", tick, "{msg}"),
        _ => tracing::error!(source = "wasm", tick, level, "{msg}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
