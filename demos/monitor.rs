//! Connect to a P300 and print everything it reports.
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.50
//! cargo run --example monitor -- --config dsp.json
//! ```

use shure_p300::{DspConfig, DspSession, JsonConfigStore, SessionEvent};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, store) = match args.as_slice() {
        [flag, path] if flag == "--config" => {
            (DspConfig::load(path)?, Some(Arc::new(JsonConfigStore::new(path))))
        }
        [host] => (DspConfig::new(host.as_str()), None),
        _ => {
            eprintln!("usage: monitor <host> | monitor --config <file>");
            std::process::exit(2);
        }
    };

    let session = DspSession::connect(config).await?;
    if let Some(store) = store {
        session.set_config_store(store);
    }

    let mut events = session.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event? {
                SessionEvent::OnlineChanged(online) => {
                    println!("online: {}", online);
                    if online {
                        session.update_device_info()?;
                    }
                }
                SessionEvent::IdentityChanged(identity) => println!(
                    "firmware {} serial {} ip {}",
                    identity.firmware_version, identity.serial_number, identity.ip_address
                ),
                SessionEvent::MuteChanged { channel, muted } => {
                    println!("{:<16} mute  {}", channel.name(), muted)
                }
                SessionEvent::LevelChanged { channel, level } => {
                    println!("{:<16} level {}", channel.name(), level)
                }
                SessionEvent::RestartRequired { address } => {
                    println!("address changed to {}, restart required", address)
                }
            },
        }
    }

    session.shutdown();
    Ok(())
}
