use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    panels::{ControlPanel, MessagePanel, SensorPanel, Toggle},
    ClientConfig, SyncClient, Synchronizer,
};
use shared::paths::LedChannel;

#[derive(Parser, Debug)]
#[command(about = "Terminal dashboard for an air-quality device behind the airlink store")]
struct Args {
    #[arg(long, env = "AIRLINK_SERVER_URL")]
    server_url: String,
    #[arg(long, env = "AIRLINK_AUTH_TOKEN")]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch live sensor readings.
    Sensors,
    /// Read or flip the device command flags.
    Control {
        #[command(subcommand)]
        action: ControlAction,
    },
    /// Show, set, or clear the device display message.
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
}

#[derive(Subcommand, Debug)]
enum ControlAction {
    /// Print the current flag states.
    Status,
    /// Toggle automatic mode.
    Auto { state: OnOff },
    /// Toggle the alarm buzzer.
    Buzzer { state: OnOff },
    /// Override one LED channel (e.g. tempGreen, humidRed).
    Led { channel: LedChannel, state: OnOff },
}

#[derive(Subcommand, Debug)]
enum MessageAction {
    /// Print the message currently on the device display.
    Show,
    /// Send a message to the device display.
    Set { text: String },
    /// Clear the device display.
    Clear,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn as_bool(self) -> bool {
        matches!(self, OnOff::On)
    }
}

fn describe(toggle: Toggle) -> &'static str {
    if toggle.effective() {
        "on"
    } else {
        "off"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let args = Args::parse();

    let client = SyncClient::connect(ClientConfig {
        server_url: args.server_url,
        auth_token: args.token,
    })
    .context("server connection is misconfigured")?;
    let sync = Synchronizer::new(Arc::new(client));

    match args.command {
        Command::Sensors => watch_sensors(&sync).await,
        Command::Control { action } => run_control(&sync, action).await,
        Command::Message { action } => run_message(&sync, action).await,
    }
}

async fn watch_sensors(sync: &Synchronizer) -> Result<()> {
    let mut panel = SensorPanel::attach(sync).await?;
    println!("watching sensors (ctrl-c to stop)");
    while let Some(snapshot) = panel.next_snapshot().await {
        let snapshot =
            snapshot.context("sensor subscription failed; run the command again to resubscribe")?;
        println!(
            "[{}] temperature {:>8}  humidity {:>7}  gas {}",
            Local::now().format("%H:%M:%S"),
            snapshot.temperature.display(),
            snapshot.humidity.display(),
            snapshot.gas.display(),
        );
    }
    Ok(())
}

async fn run_control(sync: &Synchronizer, action: ControlAction) -> Result<()> {
    let mut panel = ControlPanel::attach(sync).await?;
    if let Some(update) = panel.sync_once().await {
        update.context("could not read the current command state")?;
    }

    match action {
        ControlAction::Status => {
            println!("autoMode: {}", describe(panel.auto_mode()));
            println!("buzzer:   {}", describe(panel.buzzer()));
            for channel in LedChannel::ALL {
                println!("led {:<12} {}", channel, describe(panel.led(channel)));
            }
        }
        ControlAction::Auto { state } => {
            panel
                .set_auto_mode(state.as_bool())
                .await
                .context("autoMode update failed; the previous value still stands")?;
            println!("autoMode set to {}", describe(panel.auto_mode()));
        }
        ControlAction::Buzzer { state } => {
            panel
                .set_buzzer(state.as_bool())
                .await
                .context("buzzer update failed; the previous value still stands")?;
            println!("buzzer set to {}", describe(panel.buzzer()));
        }
        ControlAction::Led { channel, state } => {
            panel
                .set_led(channel, state.as_bool())
                .await
                .context("led update failed; the previous value still stands")?;
            println!("led {channel} set to {}", describe(panel.led(channel)));
        }
    }
    Ok(())
}

async fn run_message(sync: &Synchronizer, action: MessageAction) -> Result<()> {
    let mut panel = MessagePanel::attach(sync).await?;
    if let Some(update) = panel.sync_once().await {
        update.context("could not read the current display message")?;
    }

    match action {
        MessageAction::Show => {
            println!("display: {}", panel.current());
        }
        MessageAction::Set { text } => {
            panel
                .send(&text)
                .await
                .context("message was not sent; the display is unchanged")?;
            println!("message sent to the display");
        }
        MessageAction::Clear => {
            panel
                .clear()
                .await
                .context("message was not cleared; the display is unchanged")?;
            println!("display message cleared");
        }
    }
    Ok(())
}
