use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::OwnerId;
use storage::{DeviceStore, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/greenhouse.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    AddDevice {
        owner_id: i64,
        name: String,
        #[arg(default_value = "sensor")]
        kind: String,
    },
    ListDevices {
        owner_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => match storage.create_user(&username).await? {
            Some(owner_id) => println!("created owner_id={}", owner_id.0),
            None => bail!("username '{username}' is already taken"),
        },
        Command::AddDevice {
            owner_id,
            name,
            kind,
        } => {
            let device = storage
                .create_device(OwnerId(owner_id), &name, &kind)
                .await?;
            println!("created device_id={}", device.device_id.0);
        }
        Command::ListDevices { owner_id } => {
            let devices = storage.list_devices_for_owner(OwnerId(owner_id)).await?;
            if devices.is_empty() {
                println!("no devices for owner_id={owner_id}");
            }
            for device in devices {
                println!(
                    "{}\t{}\t{}\t{}",
                    device.device_id.0, device.name, device.kind, device.health
                );
            }
        }
    }

    Ok(())
}
