//! End-to-end scenarios exercising the full runtime: routing, ordering,
//! fan-out, fallback handling, thread-pool scaling, and cross-framework
//! traffic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use aviary::{
    Actor, Address, Counter, Endpoint, FallbackHandler, Framework, Handlers, Parameters, Receiver,
    WireMessage,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Replies to every `i32` with its successor.
struct Echo;

impl Actor for Echo {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<i32>(|_echo, value, from, ctx| {
            ctx.send(value + 1, from);
        });
    }
}

#[test]
fn echo_round_trip() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    let echo = framework.register(Echo, None).unwrap();
    let receiver = Receiver::<i32>::new(&framework).unwrap();

    assert!(framework.send(7, receiver.address(), echo.address()));

    let (reply, from) = receiver.wait_timeout(DEADLINE).expect("no reply");
    assert_eq!(reply, 8);
    assert_eq!(from, echo.address());
}

/// Appends every received `u32` and reports the full sequence once complete.
struct Collector {
    expect: usize,
    seen: Vec<u32>,
    report_to: Address,
}

impl Actor for Collector {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<u32>(|collector, value, _from, ctx| {
            collector.seen.push(*value);
            if collector.seen.len() == collector.expect {
                ctx.send(std::mem::take(&mut collector.seen), collector.report_to.clone());
            }
        });
    }
}

#[test]
fn messages_arrive_in_send_order_under_load() {
    aviary::logging::init_test();
    const COUNT: u32 = 10_000;

    let framework = Framework::with_parameters(Parameters::with_threads(4)).unwrap();
    let receiver = Receiver::<Vec<u32>>::new(&framework).unwrap();
    let collector = framework
        .register(
            Collector {
                expect: COUNT as usize,
                seen: Vec::new(),
                report_to: receiver.address(),
            },
            None,
        )
        .unwrap();

    for value in 0..COUNT {
        assert!(framework.send(value, Address::null(), collector.address()));
    }

    let (sequence, _from) = receiver.wait_timeout(DEADLINE).expect("no report");
    assert_eq!(sequence.len(), COUNT as usize);
    assert!(sequence.iter().copied().eq(0..COUNT));
}

/// Forwards every `u32` to a fixed downstream address.
struct Forwarder {
    downstream: Address,
}

impl Actor for Forwarder {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<u32>(|forwarder, value, _from, ctx| {
            ctx.send(*value, forwarder.downstream.clone());
        });
    }
}

/// Counts received `u32` messages and reports the total once it is reached.
struct Sink {
    count: u32,
    expect: u32,
    report_to: Address,
}

impl Actor for Sink {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<u32>(|sink, _value, _from, ctx| {
            sink.count += 1;
            if sink.count == sink.expect {
                ctx.send(sink.count, sink.report_to.clone());
            }
        });
    }
}

#[test]
fn fan_out_through_forwarders_loses_nothing() {
    aviary::logging::init_test();
    const FORWARDERS: usize = 100;
    const SENDERS: usize = 10;
    const PER_SENDER: usize = 1_000;
    const TOTAL: u32 = (SENDERS * PER_SENDER) as u32;

    let framework = Framework::with_parameters(Parameters::with_threads(4)).unwrap();
    let receiver = Receiver::<u32>::new(&framework).unwrap();
    let sink = framework
        .register(
            Sink {
                count: 0,
                expect: TOTAL,
                report_to: receiver.address(),
            },
            None,
        )
        .unwrap();

    let forwarders: Vec<_> = (0..FORWARDERS)
        .map(|_| {
            framework
                .register(
                    Forwarder {
                        downstream: sink.address(),
                    },
                    None,
                )
                .unwrap()
        })
        .collect();
    let targets: Vec<Address> = forwarders.iter().map(|f| f.address()).collect();

    thread::scope(|scope| {
        for sender in 0..SENDERS {
            let framework = &framework;
            let targets = &targets;
            scope.spawn(move || {
                for n in 0..PER_SENDER {
                    let target = &targets[(sender * PER_SENDER + n) % FORWARDERS];
                    assert!(framework.send(n as u32, Address::null(), target.clone()));
                }
            });
        }
    });

    let (total, _from) = receiver.wait_timeout(DEADLINE).expect("no total");
    assert_eq!(total, TOTAL);
}

#[test]
fn unknown_recipient_reports_to_the_fallback_handler() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(1)).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen_sender = Arc::new(Mutex::new(None));
    {
        let calls = Arc::clone(&calls);
        let seen_sender = Arc::clone(&seen_sender);
        framework.set_fallback_handler(FallbackHandler::Typed(Box::new(move |from| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen_sender.lock().unwrap() = Some(from);
        })));
    }

    let from = Address::new(framework.index(), 77);
    let to = Address::new(framework.index(), 999_999);

    // Undeliverable, but the send itself is accepted.
    assert!(framework.send(42u32, from.clone(), to));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen_sender.lock().unwrap().take(), Some(from));
}

/// Handles only `i32`; everything else is unhandled by type.
struct Narrow;

impl Actor for Narrow {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<i32>(|_narrow, _value, _from, _ctx| {});
    }
}

#[test]
fn unhandled_message_type_reaches_the_fallback_handler() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(1)).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    {
        let calls = Arc::clone(&calls);
        framework.set_fallback_handler(FallbackHandler::Blind(Box::new(move |_bytes, _from| {
            calls.fetch_add(1, Ordering::SeqCst);
        })));
    }

    let narrow = framework.register(Narrow, None).unwrap();
    assert!(framework.send("surprise".to_string(), Address::null(), narrow.address()));

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1));
}

/// Does nothing with its messages; used to generate pool activity.
struct Discard;

impl Actor for Discard {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<u32>(|_discard, _value, _from, _ctx| {});
    }
}

#[test]
fn thread_pool_scales_towards_the_target() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(4)).unwrap();
    assert_eq!(framework.num_threads(), 4);

    framework.set_min_threads(8);
    assert!(eventually(|| framework.num_threads() == 8));
    assert!(framework.peak_threads() >= 8);

    let discard = framework.register(Discard, None).unwrap();
    framework.set_max_threads(2);
    for n in 0..100u32 {
        framework.send(n, Address::null(), discard.address());
    }
    assert!(eventually(|| framework.num_threads() <= 2));
    assert!(framework.peak_threads() >= 8);
    assert!(framework.num_threads() <= framework.peak_threads());
}

#[test]
fn counters_accumulate_and_reset() {
    aviary::logging::init_test();
    const COUNT: u32 = 200;

    let framework = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    let receiver = Receiver::<u32>::new(&framework).unwrap();
    let sink = framework
        .register(
            Sink {
                count: 0,
                expect: COUNT,
                report_to: receiver.address(),
            },
            None,
        )
        .unwrap();

    for n in 0..COUNT {
        framework.send(n, Address::null(), sink.address());
    }
    receiver.wait_timeout(DEADLINE).expect("no total");

    // Every send and the final report were dispatched by a worker.
    assert!(framework.counter_value(Counter::MessagesProcessed) >= COUNT);

    let mut per_thread = [0u32; 16];
    let written = framework.per_thread_counter_values(Counter::MessagesProcessed, &mut per_thread);
    assert!(written >= 1 && written <= 2);

    framework.reset_counters();
    assert_eq!(framework.counter_value(Counter::MessagesProcessed), 0);
}

#[test]
fn messages_cross_framework_boundaries() {
    aviary::logging::init_test();

    let framework_a = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    let framework_b = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    assert_ne!(framework_a.index(), framework_b.index());

    let receiver = Receiver::<i32>::new(&framework_a).unwrap();
    let echo = framework_b.register(Echo, None).unwrap();

    // Sent through A, hosted by B, reply crosses back to A.
    assert!(framework_a.send(41, receiver.address(), echo.address()));

    let (reply, _from) = receiver.wait_timeout(DEADLINE).expect("no reply");
    assert_eq!(reply, 42);
}

#[test]
fn named_mailboxes_resolve_and_outlive_their_actor() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    let receiver = Receiver::<i32>::new(&framework).unwrap();

    let echo = framework.register(Echo, Some("echo.service")).unwrap();
    let by_name = Address::named("echo.service");

    assert!(framework.send(1, receiver.address(), by_name.clone()));
    assert_eq!(receiver.wait_timeout(DEADLINE).map(|(v, _)| v), Some(2));

    // A second actor under the same name is rejected while the first lives.
    assert!(framework.register(Echo, Some("echo.service")).is_err());

    // The slot survives the actor and can be rebound.
    drop(echo);
    let echo = framework.register(Echo, Some("echo.service")).unwrap();
    assert!(framework.send(10, receiver.address(), by_name));
    assert_eq!(receiver.wait_timeout(DEADLINE).map(|(v, _)| v), Some(11));
    drop(echo);
}

#[derive(Default)]
struct RecordingEndpoint {
    accept: bool,
    sent: Mutex<Vec<(Vec<u8>, Address)>>,
}

impl Endpoint for RecordingEndpoint {
    fn send(&self, message: WireMessage<'_>, to: &Address) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((message.data.to_vec(), to.clone()));
        self.accept
    }
}

#[test]
fn unresolved_names_are_forwarded_to_the_endpoint() {
    aviary::logging::init_test();

    let endpoint = Arc::new(RecordingEndpoint {
        accept: true,
        ..Default::default()
    });
    let framework = Framework::with_endpoint(
        endpoint.clone(),
        Some("edge"),
        Parameters::with_threads(1),
    )
    .unwrap();
    assert_eq!(framework.name(), "edge");

    assert!(framework.send(0xAABBCCDDu32, Address::null(), Address::named("far.away")));

    let sent = endpoint.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 0xAABBCCDDu32.to_ne_bytes());
    assert_eq!(sent[0].1.name(), Some("far.away"));
}

#[test]
fn endpoint_refusal_fails_the_send_and_runs_the_fallback() {
    aviary::logging::init_test();

    let endpoint = Arc::new(RecordingEndpoint {
        accept: false,
        ..Default::default()
    });
    let framework =
        Framework::with_endpoint(endpoint, None, Parameters::with_threads(1)).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    {
        let calls = Arc::clone(&calls);
        framework.set_fallback_handler(FallbackHandler::Typed(Box::new(move |_from| {
            calls.fetch_add(1, Ordering::SeqCst);
        })));
    }

    assert!(!framework.send(1u8, Address::null(), Address::named("far.away")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn inbound_deliveries_resolve_against_the_local_directory() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
    let receiver = Receiver::<i32>::new(&framework).unwrap();
    let echo = framework.register(Echo, None).unwrap();

    // As an endpoint would after decoding a frame from the wire.
    assert!(framework.deliver(5, receiver.address(), echo.address()));
    assert_eq!(receiver.wait_timeout(DEADLINE).map(|(v, _)| v), Some(6));
}

#[test]
fn queued_message_counts_are_observable() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(1)).unwrap();
    let receiver = Receiver::<u32>::new(&framework).unwrap();
    let sink = framework
        .register(
            Sink {
                count: 0,
                expect: 3,
                report_to: receiver.address(),
            },
            None,
        )
        .unwrap();

    for n in 0..3u32 {
        framework.send(n, Address::null(), sink.address());
    }
    receiver.wait_timeout(DEADLINE).expect("no total");

    assert!(eventually(|| sink.queued_messages() == 0));
}

/// A handler that panics must not take the mailbox or the pool down.
struct Faulty {
    failures: Arc<AtomicU32>,
}

impl Actor for Faulty {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<u32>(|faulty, value, _from, ctx| {
            if *value == 0 {
                faulty.failures.fetch_add(1, Ordering::SeqCst);
                panic!("injected handler failure");
            }
            ctx.send(*value, faulty_reply());
        });
    }
}

// The reply target is fixed by the test through a named receiver.
fn faulty_reply() -> Address {
    Address::named("faulty.replies")
}

#[test]
fn a_panicking_handler_leaves_the_mailbox_usable() {
    aviary::logging::init_test();

    let framework = Framework::with_parameters(Parameters::with_threads(1)).unwrap();
    let receiver = Receiver::<u32>::named(&framework, "faulty.replies").unwrap();

    let failures = Arc::new(AtomicU32::new(0));
    let faulty = framework
        .register(
            Faulty {
                failures: Arc::clone(&failures),
            },
            None,
        )
        .unwrap();

    framework.send(0u32, Address::null(), faulty.address());
    framework.send(7u32, Address::null(), faulty.address());

    // The panic is contained and the next message still gets through.
    let (survivor, _from) = receiver.wait_timeout(DEADLINE).expect("no survivor");
    assert_eq!(survivor, 7);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}
