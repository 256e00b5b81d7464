use clap::{App, Arg, SubCommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "23232";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("p1p2-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Console client for the P1/P2 bridge daemon")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Bridge console host")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Bridge console port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("raw")
                .short("r")
                .long("raw")
                .help("Print lines verbatim without channel coloring")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("Stream bridge output until interrupted")
                .arg(
                    Arg::with_name("channel")
                        .help("Only show one channel tag (R, P, J, S)")
                        .takes_value(true)
                        .long("channel")
                        .possible_values(&["R", "P", "J", "S"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("send")
                .about("Send one control command and print the response")
                .arg(
                    Arg::with_name("command")
                        .help("Command line, e.g. S2, J0x3803, V, K")
                        .required(true),
                ),
        )
        .subcommand(SubCommand::with_name("filter").about("Report the current output filter level"))
        .subcommand(SubCommand::with_name("mode").about("Report the current output mode bitmask"))
        .subcommand(SubCommand::with_name("version").about("Report bridge version and uptime"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT);
    let raw = matches.is_present("raw");
    let addr = format!("{host}:{port}");

    match matches.subcommand() {
        ("watch", Some(sub)) => watch(&addr, sub.value_of("channel"), raw).await,
        ("send", Some(sub)) => {
            let command = sub.value_of("command").unwrap_or_default();
            send_and_report(&addr, command, raw).await
        }
        ("filter", _) => send_and_report(&addr, "S", raw).await,
        ("mode", _) => send_and_report(&addr, "J", raw).await,
        ("version", _) => send_and_report(&addr, "V", raw).await,
        _ => watch(&addr, None, raw).await,
    }
}

async fn watch(
    addr: &str,
    channel: Option<&str>,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(addr).await?;
    eprintln!("{} {}", "connected to".dimmed(), addr);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(wanted) = channel {
            if !line.starts_with(wanted) {
                continue;
            }
        }
        print_line(&line, raw);
    }
    eprintln!("{}", "connection closed".dimmed());
    Ok(())
}

async fn send_and_report(
    addr: &str,
    command: &str,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    // Command responses come back tagged S on the shared stream
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line.starts_with('S') {
            print_line(&line, raw);
            return Ok(());
        }
    }
    eprintln!("{}", "no response before the connection closed".red());
    std::process::exit(1);
}

fn print_line(line: &str, raw: bool) {
    if raw {
        println!("{line}");
        return;
    }
    let (tag, rest) = line.split_at(line.find(' ').unwrap_or(line.len()));
    let tag = match tag {
        "R" => tag.yellow(),
        "P" => tag.green(),
        "J" => tag.cyan(),
        "S" => tag.magenta(),
        other => other.normal(),
    };
    println!("{}{}", tag.bold(), rest);
}
