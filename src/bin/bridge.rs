use clap::{App, Arg};
use p1p2_bridge::supervisor::RestartSignal;
use p1p2_bridge::{Bridge, BridgeConfig, FilterLevel, OutputMode, Transport};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_BUS_ADDR: &str = "127.0.0.1:7000";
const DEFAULT_MQTT_HOST: &str = "127.0.0.1";
const DEFAULT_MQTT_PORT: &str = "1883";
const DEFAULT_CONSOLE_PORT: &str = "23232";

const CONSOLE_BROADCAST_BUFFER_SIZE: usize = 256;
const SERIAL_ECHO_BUFFER_SIZE: usize = 64;
const TICK_INTERVAL_MS: u64 = 250;
const BUS_RECONNECT_DELAY_MS: u64 = 2_000;
const MQTT_EVENT_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("p1p2-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("P1/P2 appliance bus to MQTT bridge daemon")
        .arg(
            Arg::with_name("bus")
                .short("b")
                .long("bus")
                .value_name("ADDR")
                .help("TCP address of the bus byte source")
                .takes_value(true)
                .default_value(DEFAULT_BUS_ADDR),
        )
        .arg(
            Arg::with_name("mqtt-host")
                .short("m")
                .long("mqtt-host")
                .value_name("HOST")
                .help("MQTT broker host")
                .takes_value(true)
                .default_value(DEFAULT_MQTT_HOST),
        )
        .arg(
            Arg::with_name("mqtt-port")
                .long("mqtt-port")
                .value_name("PORT")
                .help("MQTT broker port")
                .takes_value(true)
                .default_value(DEFAULT_MQTT_PORT),
        )
        .arg(
            Arg::with_name("console-port")
                .short("c")
                .long("console-port")
                .value_name("PORT")
                .help("TCP port for the line-oriented monitor console")
                .takes_value(true)
                .default_value(DEFAULT_CONSOLE_PORT),
        )
        .arg(
            Arg::with_name("device-id")
                .short("d")
                .long("device-id")
                .value_name("ID")
                .help("Device identity used in topic paths")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("filter")
                .short("s")
                .long("filter")
                .value_name("LEVEL")
                .help("Initial output filter level")
                .takes_value(true)
                .possible_values(&["0", "1", "2", "3"]),
        )
        .arg(
            Arg::with_name("mode")
                .short("j")
                .long("mode")
                .value_name("HEX")
                .help("Initial output mode bitmask (hex)")
                .takes_value(true),
        )
        .get_matches();

    let mut config = BridgeConfig::default();
    if let Some(id) = matches.value_of("device-id") {
        config.device_id = id.to_string();
    }
    if let Some(level) = matches.value_of("filter") {
        let level: u8 = level.parse()?;
        config.output_filter = FilterLevel::from_u8(level).unwrap_or(config.output_filter);
    }
    if let Some(mode) = matches.value_of("mode") {
        let digits = mode.strip_prefix("0x").unwrap_or(mode);
        config.output_mode = OutputMode::from_bits(u16::from_str_radix(digits, 16)?);
    }

    let bus_addr = matches.value_of("bus").unwrap_or(DEFAULT_BUS_ADDR).to_string();
    let mqtt_host = matches
        .value_of("mqtt-host")
        .unwrap_or(DEFAULT_MQTT_HOST)
        .to_string();
    let mqtt_port: u16 = matches.value_of("mqtt-port").unwrap_or(DEFAULT_MQTT_PORT).parse()?;
    let console_port: u16 = matches
        .value_of("console-port")
        .unwrap_or(DEFAULT_CONSOLE_PORT)
        .parse()?;

    let topic_commands = config.topic_commands();
    let topic_commands_any = config.topic_commands_any();
    let mqtt_qos = qos_from_u8(config.mqtt_qos);

    info!(
        "p1p2-bridge v{} starting (bus={}, broker={}:{})",
        env!("CARGO_PKG_VERSION"),
        bus_addr,
        mqtt_host,
        mqtt_port
    );

    let mut bridge = Bridge::new(config.clone());
    bridge.start(now_ms());
    let bridge = Arc::new(Mutex::new(bridge));

    let mut mqtt_options = MqttOptions::new(
        format!("p1p2-bridge-{}", config.device_id),
        mqtt_host,
        mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (mqtt_client, mut mqtt_eventloop) = AsyncClient::new(mqtt_options, MQTT_EVENT_CAPACITY);

    let (console_tx, _) = broadcast::channel::<String>(CONSOLE_BROADCAST_BUFFER_SIZE);
    let (serial_tx, serial_rx) = mpsc::channel::<Vec<u8>>(SERIAL_ECHO_BUFFER_SIZE);

    let sinks = Sinks {
        mqtt: mqtt_client.clone(),
        mqtt_qos,
        console: console_tx.clone(),
        serial: serial_tx,
    };

    // Console listener for monitor clients
    let console_bridge = Arc::clone(&bridge);
    let console_sinks = sinks.clone();
    let console_broadcast = console_tx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            run_console_listener(console_port, console_bridge, console_sinks, console_broadcast)
                .await
        {
            error!("console listener error: {}", e);
        }
    });

    // Bus byte source
    let bus_bridge = Arc::clone(&bridge);
    let bus_sinks = sinks.clone();
    tokio::spawn(async move {
        run_bus_reader(bus_addr, bus_bridge, bus_sinks, serial_rx).await;
    });

    // MQTT event loop: connection state, inbound commands
    let mqtt_bridge = Arc::clone(&bridge);
    let mqtt_sinks = sinks.clone();
    let command_topic = topic_commands.clone();
    let command_topic_any = topic_commands_any.clone();
    let subscribe_client = mqtt_client.clone();
    tokio::spawn(async move {
        loop {
            match mqtt_eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("broker connection established");
                    if let Err(e) = subscribe_client.subscribe(&command_topic, QoS::AtLeastOnce).await
                    {
                        warn!("command subscribe failed: {}", e);
                    }
                    if let Err(e) = subscribe_client
                        .subscribe(&command_topic_any, QoS::AtLeastOnce)
                        .await
                    {
                        warn!("command subscribe failed: {}", e);
                    }
                    let out = {
                        let mut bridge = mqtt_bridge.lock().await;
                        bridge.transport_connected(now_ms())
                    };
                    deliver(&mqtt_sinks, out.messages).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let line = String::from_utf8_lossy(&publish.payload).to_string();
                    info!("command via {}: {}", publish.topic, line.trim());
                    let out = {
                        let mut bridge = mqtt_bridge.lock().await;
                        bridge.handle_command(&line, now_ms())
                    };
                    deliver(&mqtt_sinks, out.messages).await;
                    if let Some(signal) = out.restart {
                        shutdown(signal);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("broker connection lost: {}", e);
                    {
                        let mut bridge = mqtt_bridge.lock().await;
                        bridge.transport_disconnected(now_ms());
                    }
                    time::sleep(Duration::from_millis(BUS_RECONNECT_DELAY_MS)).await;
                }
            }
        }
    });

    // Main tick loop drives pseudo-packets, replays and supervision
    let mut interval = time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        interval.tick().await;
        let cycle_start = std::time::Instant::now();

        let out = {
            let mut bridge = bridge.lock().await;
            bridge.report_free_memory(free_memory_bytes());
            bridge.tick(now_ms())
        };
        deliver(&sinks, out.messages).await;
        if let Some(signal) = out.restart {
            shutdown(signal);
        }

        let mut bridge = bridge.lock().await;
        bridge.note_loop_time_us(cycle_start.elapsed().as_micros() as u32);
    }
}

/// Outbound fan-out targets, one per transport channel.
#[derive(Clone)]
struct Sinks {
    mqtt: AsyncClient,
    mqtt_qos: QoS,
    console: broadcast::Sender<String>,
    serial: mpsc::Sender<Vec<u8>>,
}

async fn deliver(sinks: &Sinks, messages: Vec<p1p2_bridge::OutboundMessage>) {
    for message in messages {
        match message.transport {
            Transport::Mqtt => {
                if let Err(e) = sinks
                    .mqtt
                    .publish(&message.topic, sinks.mqtt_qos, message.retain, message.payload)
                    .await
                {
                    warn!("publish to {} failed: {}", message.topic, e);
                }
            }
            Transport::Console => {
                let line = format!("{} {}", message.topic, String::from_utf8_lossy(&message.payload));
                // No receivers is fine, monitors come and go
                let _ = sinks.console.send(line);
            }
            Transport::Serial => {
                let mut bytes = message.topic.into_bytes();
                bytes.push(b' ');
                bytes.extend_from_slice(&message.payload);
                bytes.push(b'\n');
                if sinks.serial.send(bytes).await.is_err() {
                    warn!("serial echo channel closed");
                }
            }
        }
    }
}

/// Reads raw bus bytes from the TCP byte source and feeds them to the
/// engine; drains serial-echo output back over the same connection.
async fn run_bus_reader(
    addr: String,
    bridge: Arc<Mutex<Bridge>>,
    sinks: Sinks,
    mut serial_rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("bus source {} unreachable: {}", addr, e);
                time::sleep(Duration::from_millis(BUS_RECONNECT_DELAY_MS)).await;
                continue;
            }
        };
        info!("bus source connected: {}", addr);
        let (mut reader, mut writer) = stream.into_split();

        let mut buffer = [0u8; 1024];
        loop {
            tokio::select! {
                read = reader.read(&mut buffer) => {
                    match read {
                        Ok(0) => {
                            warn!("bus source closed the connection");
                            break;
                        }
                        Ok(n) => {
                            let out = {
                                let mut bridge = bridge.lock().await;
                                bridge.feed(&buffer[..n], now_ms())
                            };
                            deliver(&sinks, out.messages).await;
                        }
                        Err(e) => {
                            warn!("bus read error: {}", e);
                            break;
                        }
                    }
                }
                echo = serial_rx.recv() => {
                    match echo {
                        Some(bytes) => {
                            if let Err(e) = writer.write_all(&bytes).await {
                                warn!("serial echo write failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        time::sleep(Duration::from_millis(BUS_RECONNECT_DELAY_MS)).await;
    }
}

async fn run_console_listener(
    port: u16,
    bridge: Arc<Mutex<Bridge>>,
    sinks: Sinks,
    console_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("console listening on port {}", port);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("monitor connected: {}", addr);
        let client_bridge = Arc::clone(&bridge);
        let client_sinks = sinks.clone();
        let client_rx = console_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = handle_console_client(stream, client_bridge, client_sinks, client_rx).await
            {
                warn!("monitor {} error: {}", addr, e);
            }
            info!("monitor disconnected: {}", addr);
        });
    }
}

async fn handle_console_client(
    stream: TcpStream,
    bridge: Arc<Mutex<Bridge>>,
    sinks: Sinks,
    mut console_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let stream_writer = Arc::clone(&writer);
    let stream_task = tokio::spawn(async move {
        while let Ok(line) = console_rx.recv().await {
            let mut writer = stream_writer.lock().await;
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let out = {
                    let mut bridge = bridge.lock().await;
                    bridge.handle_command(trimmed, now_ms())
                };
                deliver(&sinks, out.messages).await;
                if let Some(signal) = out.restart {
                    shutdown(signal);
                }
            }
            Err(e) => {
                warn!("console read error: {}", e);
                break;
            }
        }
    }

    stream_task.abort();
    Ok(())
}

fn shutdown(signal: RestartSignal) -> ! {
    match signal {
        RestartSignal::TransportLost { disconnected_ms } => {
            error!(
                "broker unreachable for {}s, exiting for supervised restart",
                disconnected_ms / 1000
            );
            std::process::exit(1);
        }
        RestartSignal::Requested => {
            info!("restart requested, exiting");
            std::process::exit(0);
        }
    }
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// MemAvailable from /proc/meminfo, in bytes. None on platforms without it;
/// the engine treats absence as no pressure.
fn free_memory_bytes() -> Option<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: usize = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
