use std::{
    future::Future,
    path::PathBuf,
    pin::{pin, Pin},
    sync::Arc,
};

use clap::Parser;
use gptp::{
    config::{ClockIdentity, InstanceConfig},
    port::{Port, PortAction, PortActionIterator, TimerKind, TimestampContext, MAX_DATA_LEN},
    time::{Duration, Time, Timestamp, TimestamperEpoch},
    PtpInstance,
};
use gptp_linux::{
    clock::LinuxClock,
    config::{Config, PortConfig},
    interface_index, interface_mac, link_operstate_up,
    observer::{self, PortObservation},
    socket::{open_ethernet_socket, PDELAY_MULTICAST, PRIMARY_MULTICAST},
    tracing::{tracing_init, LogLevel},
};
use timestamped_socket::{
    interface::InterfaceName,
    networkaddress::EthernetAddress,
    socket::{InterfaceTimestampMode, Open, Socket},
};
use tokio::{sync::watch, time::Sleep};

const DEFAULT_CONFIG_PATH: &str = "/etc/gptpd/gptpd.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "gPTP (IEEE 802.1AS) time synchronization daemon", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Synchronize on this interface; an alternative to a config file for
    /// single-port setups
    #[clap(short, long, value_parser = parse_interface_name)]
    interface: Option<InterfaceName>,

    /// gPTP profile: standard, milan, avnu_base or automotive
    #[clap(short, long)]
    profile: Option<String>,

    /// Override priority1 used in the best master election (255 = slave only)
    #[clap(long)]
    priority1: Option<u8>,

    /// Set desired logging level
    #[clap(short, long)]
    loglevel: Option<LogLevel>,
}

fn parse_interface_name(s: &str) -> Result<InterfaceName, String> {
    s.parse().map_err(|()| format!("invalid interface name: {s}"))
}

pin_project_lite::pin_project! {
    /// A stoppable, resettable timer. While not armed it never completes.
    struct Timer {
        #[pin]
        timer: Sleep,
        running: bool,
    }
}

impl Timer {
    fn new() -> Self {
        Timer {
            timer: tokio::time::sleep(std::time::Duration::from_secs(0)),
            running: false,
        }
    }

    fn reset(self: Pin<&mut Self>, duration: std::time::Duration) {
        let this = self.project();
        this.timer.reset(tokio::time::Instant::now() + duration);
        *this.running = true;
    }

    fn stop(self: Pin<&mut Self>) {
        *self.project().running = false;
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();
        if *this.running {
            let result = this.timer.poll(cx);
            if result != std::task::Poll::Pending {
                *this.running = false;
            }
            result
        } else {
            std::task::Poll::Pending
        }
    }
}

/// One pinned [`Timer`] per [`TimerKind`]; the engine guarantees at most
/// one pending deadline per kind
struct PortTimers<'a> {
    announce: Pin<&'a mut Timer>,
    sync: Pin<&'a mut Timer>,
    pdelay: Pin<&'a mut Timer>,
    announce_receipt: Pin<&'a mut Timer>,
    sync_receipt: Pin<&'a mut Timer>,
    pdelay_response_receipt: Pin<&'a mut Timer>,
    pdelay_reenable: Pin<&'a mut Timer>,
    state_change: Pin<&'a mut Timer>,
    sync_rate: Pin<&'a mut Timer>,
}

impl PortTimers<'_> {
    fn for_kind(&mut self, kind: TimerKind) -> Pin<&mut Timer> {
        match kind {
            TimerKind::Announce => self.announce.as_mut(),
            TimerKind::Sync => self.sync.as_mut(),
            TimerKind::PDelay => self.pdelay.as_mut(),
            TimerKind::AnnounceReceipt => self.announce_receipt.as_mut(),
            TimerKind::SyncReceipt => self.sync_receipt.as_mut(),
            TimerKind::PDelayResponseReceipt => self.pdelay_response_receipt.as_mut(),
            TimerKind::PDelayReenable => self.pdelay_reenable.as_mut(),
            TimerKind::StateChange => self.state_change.as_mut(),
            TimerKind::SyncRate => self.sync_rate.as_mut(),
        }
    }
}

// The engine shares instance state through an atomic refcell whose borrows
// are only ever held inside synchronous calls; cooperative scheduling on a
// single thread makes them exclusive by construction.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    actual_main().await;
}

async fn actual_main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|error| {
            eprintln!("{error}");
            std::process::exit(1);
        }),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Config::from_file(&default).unwrap_or_else(|error| {
                    eprintln!("{error}");
                    std::process::exit(1);
                })
            } else {
                Config::default()
            }
        }
    };

    // The command line wins over the configuration file
    if let Some(interface) = args.interface {
        config.ports.push(PortConfig {
            interface,
            hardware_clock: None,
            sync_interval: None,
            announce_interval: None,
            pdelay_interval: None,
        });
    }
    if let Some(profile) = args.profile {
        config.profile = profile;
    }
    if let Some(priority1) = args.priority1 {
        config.priority1 = Some(priority1);
    }
    if let Some(loglevel) = args.loglevel {
        config.loglevel = loglevel;
    }

    tracing_init(config.loglevel);

    let profile = config.instance_profile().unwrap_or_else(|error| {
        log::error!("{error}");
        std::process::exit(1);
    });

    if config.ports.is_empty() {
        log::error!("no ports: pass --interface or configure [[port]] sections");
        std::process::exit(1);
    }

    let clock_identity = config.identity.unwrap_or_else(|| {
        let interface = &config.ports[0].interface;
        match interface_mac(interface) {
            Ok(mac) => ClockIdentity::from_mac_address(mac),
            Err(error) => {
                log::error!("could not read mac address of {interface}: {error}");
                std::process::exit(1);
            }
        }
    });

    log::info!(
        "starting gptpd: profile {}, clock identity {}",
        profile.kind,
        clock_identity
    );

    // The instance must outlive every port task; the daemon runs until the
    // process dies, so leaking it is the simplest sound lifetime
    let instance: &'static PtpInstance = Box::leak(Box::new(PtpInstance::new(
        InstanceConfig {
            clock_identity,
            priority_1: config.priority1,
            priority_2: config.priority2,
            domain_number: config.domain,
        },
        &profile,
    )));

    let (bmca_tx, bmca_rx) = watch::channel(0u32);
    let bmca_tx = Arc::new(bmca_tx);

    let mut observations = Vec::new();
    for port_config in &config.ports {
        let interface = port_config.interface;
        let ifindex = interface_index(&interface).unwrap_or_else(|error| {
            log::error!("could not resolve interface {interface}: {error}");
            std::process::exit(1);
        });

        let clock = match port_config.hardware_clock {
            Some(index) => LinuxClock::open_phc(index).unwrap_or_else(|error| {
                log::error!("could not open /dev/ptp{index}: {error:?}");
                std::process::exit(1);
            }),
            None => LinuxClock::system(),
        };

        let timestamping = if port_config.hardware_clock.is_some() {
            InterfaceTimestampMode::HardwarePTPAll
        } else {
            InterfaceTimestampMode::SoftwareAll
        };

        let socket = open_ethernet_socket(interface, timestamping, port_config.hardware_clock)
            .unwrap_or_else(|error| {
                log::error!("could not open PTP socket on {interface}: {error}");
                std::process::exit(1);
            });

        let port = instance.add_port(
            ifindex,
            port_config.port_profile(&profile),
            clock.clone(),
        );

        let (observation_tx, observation_rx) = watch::channel(None);
        observations.push(observation_rx);

        let epoch = if port_config.hardware_clock.is_some() {
            TimestamperEpoch(1)
        } else {
            TimestamperEpoch::SOFTWARE
        };

        tokio::spawn(port_task(
            port,
            instance,
            socket,
            interface,
            clock,
            epoch,
            observation_tx,
            bmca_tx.clone(),
            bmca_rx.clone(),
        ));
    }

    let _observer = observer::spawn(&config.observability, observations).await;

    tokio::signal::ctrl_c()
        .await
        .expect("could not wait for shutdown signal");
    log::info!("shutting down");
}

#[allow(clippy::too_many_arguments)]
async fn port_task(
    mut port: Port<'static, LinuxClock>,
    instance: &'static PtpInstance,
    mut socket: Socket<EthernetAddress, Open>,
    interface: InterfaceName,
    fallback_clock: LinuxClock,
    epoch: TimestamperEpoch,
    observation: watch::Sender<Option<PortObservation>>,
    bmca_tx: Arc<watch::Sender<u32>>,
    mut bmca_rx: watch::Receiver<u32>,
) {
    let mut announce_timer = pin!(Timer::new());
    let mut sync_timer = pin!(Timer::new());
    let mut pdelay_timer = pin!(Timer::new());
    let mut announce_receipt_timer = pin!(Timer::new());
    let mut sync_receipt_timer = pin!(Timer::new());
    let mut pdelay_response_receipt_timer = pin!(Timer::new());
    let mut pdelay_reenable_timer = pin!(Timer::new());
    let mut state_change_timer = pin!(Timer::new());
    let mut sync_rate_timer = pin!(Timer::new());
    let mut timers = PortTimers {
        announce: announce_timer.as_mut(),
        sync: sync_timer.as_mut(),
        pdelay: pdelay_timer.as_mut(),
        announce_receipt: announce_receipt_timer.as_mut(),
        sync_receipt: sync_receipt_timer.as_mut(),
        pdelay_response_receipt: pdelay_response_receipt_timer.as_mut(),
        pdelay_reenable: pdelay_reenable_timer.as_mut(),
        state_change: state_change_timer.as_mut(),
        sync_rate: sync_rate_timer.as_mut(),
    };

    let mut buffer = [0u8; MAX_DATA_LEN];
    let mut link_poll = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut link_up = false;
    let mut last_bmca_revision = *bmca_rx.borrow();

    let mut handled = handle_actions(
        port.handle_powerup(),
        &mut socket,
        &mut timers,
        &fallback_clock,
        epoch,
    )
    .await;
    while let Some((context, timestamp)) = handled.pending_timestamp.take() {
        handled = handle_actions(
            port.handle_send_timestamp(context, timestamp),
            &mut socket,
            &mut timers,
            &fallback_clock,
            epoch,
        )
        .await;
    }

    loop {
        let actions = tokio::select! {
            result = socket.recv(&mut buffer) => {
                match result {
                    Ok(packet) => match packet.timestamp {
                        Some(timestamp) => port.handle_event_receive(
                            &buffer[..packet.bytes_read],
                            Timestamp::new(socket_timestamp(timestamp), epoch),
                        ),
                        None => port.handle_general_receive(&buffer[..packet.bytes_read]),
                    },
                    Err(error) => {
                        log::error!("receive failure on {interface}: {error}");
                        port.handle_fault()
                    }
                }
            },
            () = &mut timers.announce => port.handle_announce_timer(),
            () = &mut timers.sync => port.handle_sync_timer(),
            () = &mut timers.pdelay => port.handle_pdelay_timer(),
            () = &mut timers.announce_receipt => port.handle_announce_receipt_timer(),
            () = &mut timers.sync_receipt => port.handle_sync_receipt_timer(),
            () = &mut timers.pdelay_response_receipt => port.handle_pdelay_response_timeout(),
            () = &mut timers.pdelay_reenable => port.handle_pdelay_reenable_timer(),
            () = &mut timers.state_change => port.handle_state_change_timer(),
            () = &mut timers.sync_rate => port.handle_sync_rate_timer(),
            _ = link_poll.tick() => {
                let up = link_operstate_up(&interface);
                if up == link_up {
                    PortActionIterator::empty()
                } else {
                    link_up = up;
                    if up {
                        log::info!("link up on {interface}");
                        port.handle_link_up()
                    } else {
                        log::info!("link down on {interface}");
                        port.handle_link_down()
                    }
                }
            },
            result = bmca_rx.changed() => {
                if result.is_err() {
                    break;
                }
                port.apply_recommended_role()
            },
        };

        let mut handled =
            handle_actions(actions, &mut socket, &mut timers, &fallback_clock, epoch).await;
        while let Some((context, timestamp)) = handled.pending_timestamp.take() {
            let send_failed = handled.send_failed;
            handled = handle_actions(
                port.handle_send_timestamp(context, timestamp),
                &mut socket,
                &mut timers,
                &fallback_clock,
                epoch,
            )
            .await;
            handled.send_failed |= send_failed;
        }
        if handled.send_failed {
            // An outbound failure takes the port out of service until the
            // link watcher sees it recover
            handle_actions(
                port.handle_fault(),
                &mut socket,
                &mut timers,
                &fallback_clock,
                epoch,
            )
            .await;
        }

        // Publish the refreshed state and, if this event ran an election,
        // let the instance's other ports take their new roles
        let _ = observation.send(Some(PortObservation {
            report: port.time_sync_report(),
            stats: port.stats(),
        }));
        let revision = instance.bmca_revision();
        if revision != last_bmca_revision {
            last_bmca_revision = revision;
            let _ = bmca_tx.send(revision);
        }
    }
}

#[derive(Default)]
struct HandledActions {
    pending_timestamp: Option<(TimestampContext, Timestamp)>,
    /// A send failed; the port must be told about the fault
    send_failed: bool,
}

async fn handle_actions(
    actions: PortActionIterator<'_>,
    socket: &mut Socket<EthernetAddress, Open>,
    timers: &mut PortTimers<'_>,
    fallback_clock: &LinuxClock,
    epoch: TimestamperEpoch,
) -> HandledActions {
    let mut handled = HandledActions::default();

    for action in actions {
        match action {
            PortAction::SendEvent {
                context,
                data,
                link_local,
            } => {
                let address = if link_local {
                    PDELAY_MULTICAST
                } else {
                    PRIMARY_MULTICAST
                };
                match socket.send_to(data, address).await {
                    Ok(Some(timestamp)) => {
                        // anything sent later gets a later timestamp, so
                        // handling only the last pending context is fine
                        handled.pending_timestamp =
                            Some((context, Timestamp::new(socket_timestamp(timestamp), epoch)));
                    }
                    Ok(None) => {
                        // No transmit timestamp from the driver; degrade to
                        // reading the clock just after the send
                        handled.pending_timestamp = Some((
                            context,
                            Timestamp::new(gptp::Clock::now(fallback_clock), epoch),
                        ));
                    }
                    Err(error) => {
                        log::error!("could not send event message: {error}");
                        handled.send_failed = true;
                    }
                }
            }
            PortAction::SendGeneral { data, link_local } => {
                let address = if link_local {
                    PDELAY_MULTICAST
                } else {
                    PRIMARY_MULTICAST
                };
                if let Err(error) = socket.send_to(data, address).await {
                    log::error!("could not send general message: {error}");
                    handled.send_failed = true;
                }
            }
            PortAction::ResetTimer { kind, duration } => {
                timers.for_kind(kind).reset(duration);
            }
            PortAction::StopTimer { kind } => {
                timers.for_kind(kind).stop();
            }
        }
    }

    handled
}

fn socket_timestamp(timestamp: timestamped_socket::socket::Timestamp) -> Time {
    let seconds = timestamp.seconds.max(0) as u64;
    Time::from_secs(seconds) + Duration::from_nanos(timestamp.nanos as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rescheduling replaces the previous deadline: exactly one firing, at
    // the later time
    #[tokio::test(start_paused = true)]
    async fn timer_reset_replaces_deadline() {
        let mut timer = pin!(Timer::new());
        timer.as_mut().reset(std::time::Duration::from_millis(100));
        timer.as_mut().reset(std::time::Duration::from_millis(300));

        tokio::select! {
            () = &mut timer => panic!("timer fired at the replaced deadline"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }

        tokio::select! {
            () = &mut timer => {}
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                panic!("timer did not fire at the new deadline")
            }
        }

        // One firing only; afterwards the timer is quiet
        tokio::select! {
            () = &mut timer => panic!("timer fired twice"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_fires() {
        let mut timer = pin!(Timer::new());
        timer.as_mut().reset(std::time::Duration::from_millis(50));
        timer.as_mut().stop();

        tokio::select! {
            () = &mut timer => panic!("cancelled timer fired"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }
    }
}
