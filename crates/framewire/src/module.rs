use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use framewire_core::{
    parse_module_config, pool, FrameHandle, ModuleHandle, OutputParameter, PinHandle, PinParams,
};
use framewire_runtime::{spawn_actor, ActorContext, ActorRef, Handler, Message};

use crate::callback::{CallbackTarget, Command, ModuleCallback, UserData};
use crate::control::ControlChannel;
use crate::pin::{InputPin, OutputPin};

pub(crate) const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Initialised,
    Started,
    Stopped,
    Closed,
}

/// Owner of a module's pins, control channel and lifecycle.
///
/// The controller runs as a thread actor: every mutation arrives through its
/// mailbox, which is what serialises API calls against control-channel
/// commands. Lifecycle callbacks (`Start`/`Stop`) are therefore delivered on
/// the actor thread, synchronously with the operation that caused them.
pub(crate) struct ModuleController {
    handle: ModuleHandle,
    state: LifecycleState,
    control_port: u16,
    control: Option<ControlChannel>,
    module_params: PinParams,
    inputs: Vec<InputPin>,
    outputs: Vec<OutputPin>,
    next_pin_handle: i32,
    target: CallbackTarget,
}

impl ModuleController {
    fn build(
        handle: ModuleHandle,
        control_port: u16,
        callback: ModuleCallback,
        user_data: Option<UserData>,
        config: &str,
    ) -> anyhow::Result<Self> {
        let parsed = parse_module_config(config);
        let target = CallbackTarget {
            module: handle,
            callback,
            user_data,
        };
        let mut controller = Self {
            handle,
            state: LifecycleState::Created,
            control_port,
            control: None,
            module_params: PinParams::parse(&parsed.module),
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_pin_handle: 0,
            target,
        };
        for bucket in &parsed.inputs {
            let pin_handle = controller.next_handle();
            let pin = InputPin::new(pin_handle, bucket, controller.target.clone())
                .with_context(|| format!("input pin '{bucket}'"))?;
            controller.inputs.push(pin);
        }
        for bucket in &parsed.outputs {
            let pin_handle = controller.next_handle();
            let pin = OutputPin::new(handle, pin_handle, bucket)
                .with_context(|| format!("output pin '{bucket}'"))?;
            controller.outputs.push(pin);
        }
        info!(
            module = %handle,
            module_type = controller.module_params.get("type").unwrap_or("unnamed"),
            inputs = controller.inputs.len(),
            outputs = controller.outputs.len(),
            "module built"
        );
        Ok(controller)
    }

    fn next_handle(&mut self) -> PinHandle {
        let handle = PinHandle::from_raw(self.next_pin_handle);
        self.next_pin_handle += 1;
        handle
    }

    fn stop_pins_and_notify(&mut self) {
        // Inputs first so nothing new enters while the output queues flush.
        for pin in &mut self.inputs {
            pin.stop();
        }
        for pin in &mut self.outputs {
            pin.stop();
        }
        self.state = LifecycleState::Stopped;
        self.target
            .emit(PinHandle::INVALID, FrameHandle::INVALID, Command::Stop);
    }
}

pub(crate) struct Init;
impl Message for Init {
    type Response = Result<(), String>;
}

impl Handler<Init> for ModuleController {
    fn handle(&mut self, _message: Init, ctx: &mut ActorContext<Self>) -> Result<(), String> {
        if self.control_port != 0 {
            let channel = ControlChannel::bind(self.control_port, self.handle, ctx.actor_ref())
                .map_err(|err| format!("control channel bind on port {}: {err}", self.control_port))?;
            self.control = Some(channel);
        } else {
            debug!(module = %self.handle, "control channel disabled");
        }
        self.state = LifecycleState::Initialised;
        Ok(())
    }
}

pub(crate) struct Start;
impl Message for Start {
    type Response = i32;
}

impl Handler<Start> for ModuleController {
    fn handle(&mut self, _message: Start, _ctx: &mut ActorContext<Self>) -> i32 {
        match self.state {
            LifecycleState::Started => {
                warn!(module = %self.handle, "module already started");
                return 0;
            }
            LifecycleState::Closed => {
                error!(module = %self.handle, "cannot start a closed module");
                return -1;
            }
            LifecycleState::Created
            | LifecycleState::Initialised
            | LifecycleState::Stopped => {}
        }

        // Outputs come up before inputs so the first received frame can be
        // forwarded straight away.
        let mut failed = false;
        for pin in &mut self.outputs {
            if let Err(err) = pin.start() {
                error!(module = %self.handle, pin = %pin.handle(), %err, "output start failed");
                failed = true;
                break;
            }
        }
        if !failed {
            for pin in &mut self.inputs {
                if let Err(err) = pin.start() {
                    error!(module = %self.handle, pin = %pin.handle(), %err, "input start failed");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            for pin in &mut self.inputs {
                pin.stop();
            }
            for pin in &mut self.outputs {
                pin.stop();
            }
            return -1;
        }

        self.state = LifecycleState::Started;
        info!(module = %self.handle, "module started");
        self.target
            .emit(PinHandle::INVALID, FrameHandle::INVALID, Command::Start);
        0
    }
}

pub(crate) struct Stop;
impl Message for Stop {
    type Response = i32;
}

impl Handler<Stop> for ModuleController {
    fn handle(&mut self, _message: Stop, _ctx: &mut ActorContext<Self>) -> i32 {
        if self.state != LifecycleState::Started {
            debug!(module = %self.handle, state = ?self.state, "stop is a no-op");
            return 0;
        }
        self.stop_pins_and_notify();
        info!(module = %self.handle, "module stopped");
        0
    }
}

pub(crate) struct Status;
impl Message for Status {
    type Response = String;
}

impl Handler<Status> for ModuleController {
    fn handle(&mut self, _message: Status, _ctx: &mut ActorContext<Self>) -> String {
        format!(
            "OK {:?} inputs={} outputs={}",
            self.state,
            self.inputs.len(),
            self.outputs.len()
        )
    }
}

pub(crate) struct CloseModule;
impl Message for CloseModule {
    type Response = ();
}

impl Handler<CloseModule> for ModuleController {
    fn handle(&mut self, _message: CloseModule, ctx: &mut ActorContext<Self>) {
        if self.state == LifecycleState::Started {
            self.stop_pins_and_notify();
        }
        if let Some(mut control) = self.control.take() {
            control.stop();
        }
        self.state = LifecycleState::Closed;
        info!(module = %self.handle, "module closed");
        ctx.stop();
    }
}

pub(crate) struct SendFrame {
    pub output: PinHandle,
    pub frame: FrameHandle,
}
impl Message for SendFrame {
    type Response = i32;
}

impl Handler<SendFrame> for ModuleController {
    fn handle(&mut self, message: SendFrame, _ctx: &mut ActorContext<Self>) -> i32 {
        let Some(pin) = self
            .outputs
            .iter()
            .find(|pin| pin.handle() == message.output)
        else {
            // Historical behavior: a send with no matching output succeeds
            // as a no-op so sender modules run unchanged without consumers.
            error!(
                module = %self.handle,
                output = %message.output,
                "send with no matching output pin, frame not forwarded"
            );
            return 0;
        };
        if pool::global().frame(message.frame).is_none() {
            error!(
                module = %self.handle,
                frame = %message.frame,
                "send of a frame unknown to the pool"
            );
            return -1;
        }
        match pin.send(message.frame) {
            Ok(()) => 0,
            Err(err) => {
                error!(module = %self.handle, output = %message.output, %err, "send failed");
                -1
            }
        }
    }
}

pub(crate) struct SetOutputParam {
    pub output: PinHandle,
    pub param: OutputParameter,
    pub value: i64,
}
impl Message for SetOutputParam {
    type Response = ();
}

impl Handler<SetOutputParam> for ModuleController {
    fn handle(&mut self, message: SetOutputParam, _ctx: &mut ActorContext<Self>) {
        match self
            .outputs
            .iter_mut()
            .find(|pin| pin.handle() == message.output)
        {
            Some(pin) => pin.set_parameter(message.param, message.value),
            None => error!(
                module = %self.handle,
                output = %message.output,
                "set_output_parameter on unknown pin"
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PinSnapshot {
    pub inputs: Vec<PinHandle>,
    pub outputs: Vec<PinHandle>,
}

pub(crate) struct PinInventory;
impl Message for PinInventory {
    type Response = PinSnapshot;
}

impl Handler<PinInventory> for ModuleController {
    fn handle(&mut self, _message: PinInventory, _ctx: &mut ActorContext<Self>) -> PinSnapshot {
        PinSnapshot {
            inputs: self.inputs.iter().map(InputPin::handle).collect(),
            outputs: self.outputs.iter().map(OutputPin::handle).collect(),
        }
    }
}

pub(crate) struct ModuleEntry {
    pub actor: ActorRef<ModuleController>,
    pub join: JoinHandle<()>,
}

/// Process-wide module registry. Slots are tombstoned on close so module
/// handles (indices) stay stable for the life of the process.
fn registry() -> &'static Mutex<Vec<Option<ModuleEntry>>> {
    static MODULES: OnceLock<Mutex<Vec<Option<ModuleEntry>>>> = OnceLock::new();
    MODULES.get_or_init(|| Mutex::new(Vec::new()))
}

/// Builds a module, spawns its actor and registers it. Returns
/// [`ModuleHandle::INVALID`] on any failure, with the cause logged.
pub(crate) fn register(
    control_port: u16,
    callback: ModuleCallback,
    config: &str,
    user_data: Option<UserData>,
) -> ModuleHandle {
    let mut modules = registry().lock().expect("module registry poisoned");
    let handle = ModuleHandle::from_raw(modules.len() as i32);

    let controller =
        match ModuleController::build(handle, control_port, callback, user_data, config) {
            Ok(controller) => controller,
            Err(err) => {
                error!(module = %handle, %err, "module creation failed");
                return ModuleHandle::INVALID;
            }
        };
    let (actor, join) = match spawn_actor(controller, format!("framewire-mod-{handle}")) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(module = %handle, %err, "module actor spawn failed");
            return ModuleHandle::INVALID;
        }
    };
    match actor.call(Init, CALL_TIMEOUT) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(module = %handle, %err, "module init failed");
            let _ = actor.call(CloseModule, CALL_TIMEOUT);
            drop(actor);
            let _ = join.join();
            return ModuleHandle::INVALID;
        }
        Err(err) => {
            error!(module = %handle, ?err, "module init call failed");
            return ModuleHandle::INVALID;
        }
    }

    modules.push(Some(ModuleEntry { actor, join }));
    handle
}

/// Clones the actor reference for a registered module.
pub(crate) fn actor_for(handle: ModuleHandle) -> Option<ActorRef<ModuleController>> {
    if !handle.is_valid() {
        return None;
    }
    let modules = registry().lock().expect("module registry poisoned");
    modules
        .get(handle.raw() as usize)
        .and_then(Option::as_ref)
        .map(|entry| entry.actor.clone())
}

/// Takes a module out of the registry, tombstoning its slot.
pub(crate) fn remove(handle: ModuleHandle) -> Option<ModuleEntry> {
    if !handle.is_valid() {
        return None;
    }
    let mut modules = registry().lock().expect("module registry poisoned");
    modules.get_mut(handle.raw() as usize).and_then(Option::take)
}
