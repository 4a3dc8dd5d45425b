//! Thread-backed actors with typed messages.
//!
//! Each actor owns its state on a dedicated named thread and consumes a
//! crossbeam mailbox. `cast` is fire-and-forget; `call` blocks the caller on a
//! rendezvous channel until the actor replies or the timeout elapses. A panic
//! inside a handler stops the actor but never crosses into callers.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::debug;

const SLOW_CALL_LOG_THRESHOLD: Duration = Duration::from_millis(150);

pub trait Actor: Send + 'static {}

impl<T> Actor for T where T: Send + 'static {}

pub trait Message: Send + 'static {
    type Response: Send + 'static;
}

pub trait Handler<M>: Actor + Sized
where
    M: Message,
{
    fn handle(&mut self, message: M, ctx: &mut ActorContext<Self>) -> M::Response;
}

pub struct ActorContext<A: Actor> {
    stop_requested: bool,
    self_ref: Option<ActorRef<A>>,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorContext<A> {
    fn new() -> Self {
        Self {
            stop_requested: false,
            self_ref: None,
            _marker: PhantomData,
        }
    }

    /// Makes the actor loop exit once the current message is handled.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Reference to the running actor, available while handling a message.
    pub fn actor_ref(&self) -> ActorRef<A> {
        self.self_ref
            .as_ref()
            .expect("actor_ref is only available while handling a message")
            .clone()
    }
}

trait Envelope<A: Actor>: Send + 'static {
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>);
}

struct CastEnvelope<M, A>
where
    M: Message<Response = ()>,
    A: Handler<M>,
{
    message: M,
    self_ref: ActorRef<A>,
}

impl<M, A> Envelope<A> for CastEnvelope<M, A>
where
    M: Message<Response = ()>,
    A: Handler<M>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        ctx.self_ref = Some(self.self_ref);
        actor.handle(self.message, ctx);
        ctx.self_ref = None;
    }
}

struct CallEnvelope<M, A>
where
    M: Message,
    A: Handler<M>,
{
    message: M,
    reply_tx: mpsc::SyncSender<M::Response>,
    self_ref: ActorRef<A>,
}

impl<M, A> Envelope<A> for CallEnvelope<M, A>
where
    M: Message,
    A: Handler<M>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        ctx.self_ref = Some(self.self_ref);
        let response = actor.handle(self.message, ctx);
        ctx.self_ref = None;
        let _ = self.reply_tx.send(response);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastError {
    MailboxClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    MailboxClosed,
    Timeout,
    ActorStopped,
    /// The call was issued from the actor's own thread and would deadlock.
    WouldDeadlock,
}

pub struct ActorRef<A: Actor> {
    tx: Sender<Box<dyn Envelope<A>>>,
    thread_id: ThreadId,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            thread_id: self.thread_id,
        }
    }
}

impl<A: Actor> ActorRef<A> {
    pub fn cast<M>(&self, message: M) -> Result<(), CastError>
    where
        M: Message<Response = ()>,
        A: Handler<M>,
    {
        let envelope: Box<dyn Envelope<A>> = Box::new(CastEnvelope {
            message,
            self_ref: self.clone(),
        });
        self.tx.send(envelope).map_err(|_| CastError::MailboxClosed)
    }

    pub fn call<M>(&self, message: M, timeout: Duration) -> Result<M::Response, CallError>
    where
        M: Message,
        A: Handler<M>,
    {
        if thread::current().id() == self.thread_id {
            return Err(CallError::WouldDeadlock);
        }
        let started = Instant::now();
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let envelope: Box<dyn Envelope<A>> = Box::new(CallEnvelope {
            message,
            reply_tx,
            self_ref: self.clone(),
        });
        self.tx
            .send(envelope)
            .map_err(|_| CallError::MailboxClosed)?;
        match reply_rx.recv_timeout(timeout) {
            Ok(response) => {
                let elapsed = started.elapsed();
                if elapsed >= SLOW_CALL_LOG_THRESHOLD {
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "slow actor call");
                }
                Ok(response)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CallError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CallError::ActorStopped),
        }
    }

    /// True when the caller is running on this actor's own thread.
    pub fn on_actor_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

pub fn spawn_actor<A: Actor>(
    actor: A,
    thread_name: impl Into<String>,
) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::unbounded::<Box<dyn Envelope<A>>>();
    let join = thread::Builder::new()
        .name(thread_name.into())
        .spawn(move || {
            let mut actor = actor;
            let mut ctx = ActorContext::<A>::new();
            while let Ok(envelope) = rx.recv() {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    envelope.deliver(&mut actor, &mut ctx);
                }));
                if result.is_err() || ctx.is_stop_requested() {
                    break;
                }
            }
        })?;
    let actor_ref = ActorRef {
        tx,
        thread_id: join.thread().id(),
    };
    Ok((actor_ref, join))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TIMEOUT: Duration = Duration::from_millis(500);

    #[derive(Default)]
    struct Counter {
        value: u64,
    }

    struct Inc;
    impl Message for Inc {
        type Response = ();
    }

    struct Get;
    impl Message for Get {
        type Response = u64;
    }

    struct SelfCall;
    impl Message for SelfCall {
        type Response = Result<u64, CallError>;
    }

    impl Handler<Inc> for Counter {
        fn handle(&mut self, _message: Inc, _ctx: &mut ActorContext<Self>) {
            self.value += 1;
        }
    }

    impl Handler<Get> for Counter {
        fn handle(&mut self, _message: Get, _ctx: &mut ActorContext<Self>) -> u64 {
            self.value
        }
    }

    impl Handler<SelfCall> for Counter {
        fn handle(
            &mut self,
            _message: SelfCall,
            ctx: &mut ActorContext<Self>,
        ) -> Result<u64, CallError> {
            ctx.actor_ref().call(Get, TEST_TIMEOUT)
        }
    }

    #[test]
    fn cast_then_call_observes_the_cast() {
        let (actor_ref, join) = spawn_actor(Counter::default(), "test-counter").expect("spawn");
        actor_ref.cast(Inc).expect("cast");
        assert_eq!(actor_ref.call(Get, TEST_TIMEOUT).expect("call"), 1);
        drop(actor_ref);
        join.join().expect("join");
    }

    #[test]
    fn call_from_own_thread_fails_fast() {
        let (actor_ref, join) = spawn_actor(Counter::default(), "test-reentrant").expect("spawn");
        let nested = actor_ref.call(SelfCall, TEST_TIMEOUT).expect("outer call");
        assert_eq!(nested, Err(CallError::WouldDeadlock));
        drop(actor_ref);
        join.join().expect("join");
    }

    #[test]
    fn call_times_out_when_the_actor_is_busy() {
        struct Slow;
        struct Nap;
        impl Message for Nap {
            type Response = ();
        }
        impl Handler<Nap> for Slow {
            fn handle(&mut self, _message: Nap, _ctx: &mut ActorContext<Self>) {
                thread::sleep(Duration::from_millis(100));
            }
        }
        struct Ping;
        impl Message for Ping {
            type Response = u8;
        }
        impl Handler<Ping> for Slow {
            fn handle(&mut self, _message: Ping, _ctx: &mut ActorContext<Self>) -> u8 {
                7
            }
        }

        let (actor_ref, join) = spawn_actor(Slow, "test-slow").expect("spawn");
        actor_ref.cast(Nap).expect("cast");
        let err = actor_ref
            .call(Ping, Duration::from_millis(10))
            .expect_err("expected timeout");
        assert_eq!(err, CallError::Timeout);
        drop(actor_ref);
        join.join().expect("join");
    }

    #[test]
    fn panicking_handler_stops_the_actor() {
        struct Bomb;
        impl Message for Bomb {
            type Response = u8;
        }
        impl Handler<Bomb> for Counter {
            fn handle(&mut self, _message: Bomb, _ctx: &mut ActorContext<Self>) -> u8 {
                panic!("boom");
            }
        }

        let (actor_ref, join) = spawn_actor(Counter::default(), "test-panic").expect("spawn");
        let err = actor_ref
            .call(Bomb, TEST_TIMEOUT)
            .expect_err("panic should fail the call");
        assert_eq!(err, CallError::ActorStopped);
        assert!(matches!(
            actor_ref.call(Get, TEST_TIMEOUT),
            Err(CallError::MailboxClosed) | Err(CallError::ActorStopped)
        ));
        drop(actor_ref);
        join.join().expect("join");
    }
}
