#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use intnet_backend::{IntNetBackend, NetworkBackend, OpenConfig};
use intnet_protocol::{MacAddr, TrunkType};
use intnet_switch::{IntNet, IntNetConfig, Session};
use intnet_trunk::LoopbackFactory;

const MAC_A: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
const MAC_B: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0b]);
const TRUNK_MAC: MacAddr = MacAddr([0x0a, 0x00, 0x27, 0x00, 0x00, 0x01]);
/// Local experimental ethertype.
const ETHERTYPE_DEMO: u16 = 0x88b5;

#[derive(Debug, Parser)]
#[command(about = "Internal network switch playground")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach two interfaces to one network and push frames between them.
    Demo {
        /// Network to create or join.
        #[arg(long, default_value = "intnet")]
        network: String,

        /// Frames to send from the first interface to the second.
        #[arg(long, default_value_t = 16)]
        frames: u32,

        /// Bridge the network to a loopback host interface of this name.
        #[arg(long)]
        bridge: Option<String>,

        /// Extra `Key=value` open settings, e.g. `AccessPolicy=public+fixed`.
        #[arg(long = "set", value_parser = parse_pair)]
        settings: Vec<(String, String)>,
    },
    /// Show the open request that `Key=value` settings turn into.
    Flags {
        #[arg(value_parser = parse_pair, required = true)]
        settings: Vec<(String, String)>,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected Key=value, got {s:?}"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn open_config(settings: &[(String, String)]) -> Result<OpenConfig> {
    OpenConfig::from_pairs(settings.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .context("invalid open settings")
}

fn frame(dst: MacAddr, src: MacAddr, seq: u32) -> Vec<u8> {
    let mut f = Vec::with_capacity(64);
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&ETHERTYPE_DEMO.to_be_bytes());
    f.extend_from_slice(&seq.to_be_bytes());
    f.resize(64, 0);
    f
}

fn demo(network: String, frames: u32, bridge: Option<String>, extra: Vec<(String, String)>) -> Result<()> {
    let config = IntNetConfig::from_env().context("reading switch configuration")?;
    tracing::debug!(?config, "switch configuration");
    let net = IntNet::new(config);
    let factory = LoopbackFactory::new(TRUNK_MAC);
    net.register_trunk_factory(TrunkType::NetFlt, factory.clone());

    let mut settings = vec![("Network".to_string(), network)];
    if let Some(ifname) = bridge {
        settings.push(("TrunkType".to_string(), TrunkType::NetFlt.to_string()));
        settings.push(("Trunk".to_string(), ifname));
    }
    settings.extend(extra);

    let session = Session::new(1, 1000, 1000);
    let with_mac = |mac: MacAddr| -> Result<IntNetBackend> {
        let mut s = settings.clone();
        s.push(("MAC".to_string(), mac.to_string()));
        let cfg = open_config(&s)?;
        IntNetBackend::open(&net, session, &cfg).with_context(|| format!("opening {}", cfg.network))
    };
    let mut a = with_mac(MAC_A)?;
    let mut b = with_mac(MAC_B)?;

    let mut received = 0u32;
    for seq in 0..frames {
        a.transmit(frame(MAC_B, MAC_A, seq));
        while b.poll_receive().is_some() {
            received += 1;
        }
    }
    a.transmit(frame(MacAddr::BROADCAST, MAC_A, frames));
    while b.poll_receive().is_some() {
        received += 1;
    }

    println!("sent {} unicast + 1 broadcast, received {received}", frames);
    println!("a: {:?}", a.stats());
    println!("b: {:?}", b.stats());
    if let Some(trunk) = factory.last() {
        let sent = trunk.take_sent();
        println!("trunk {} got {} frame(s) from the network", trunk.name(), sent.len());
    }

    drop((a, b));
    net.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::Demo {
            network,
            frames,
            bridge,
            settings,
        } => demo(network, frames, bridge, settings),
        Command::Flags { settings } => {
            let cfg = open_config(&settings)?;
            let req = cfg.to_request();
            println!("network:    {}", req.network);
            println!("trunk:      {} {:?}", req.trunk_type, req.trunk);
            println!("flags:      {:#010x} {:?}", req.flags.bits(), req.flags);
            println!("buffers:    send {} recv {}", req.cb_send, req.cb_recv);
            if let Some(mac) = cfg.mac {
                println!("mac:        {mac}");
            }
            Ok(())
        }
    }
}
