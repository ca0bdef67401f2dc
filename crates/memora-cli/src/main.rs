use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

#[zbus::proxy(
    interface = "org.memora.Daemon1",
    default_service = "org.memora.Daemon1",
    default_path = "/org/memora/Daemon1"
)]
trait Memora {
    fn status(&self) -> zbus::Result<String>;
    fn detections(&self) -> zbus::Result<String>;
    fn frame(&self) -> zbus::Result<Vec<u8>>;
    fn detection_thumbnail(&self, index: u32) -> zbus::Result<Vec<u8>>;
    fn pending(&self) -> zbus::Result<String>;
    fn pending_image(&self) -> zbus::Result<Vec<u8>>;
    fn register(&self, pending_id: u64, name: &str, relation: &str) -> zbus::Result<String>;
    fn cancel(&self) -> zbus::Result<bool>;
    fn list_identities(&self) -> zbus::Result<String>;
    fn reload(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "memora", about = "Memora face memory CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show who is in front of the camera right now
    Detections,
    /// Save the latest annotated frame as JPEG
    Frame {
        #[arg(long)]
        save: PathBuf,
    },
    /// Show the face waiting for a name
    Pending {
        /// Also write its image (PNG) here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Name the pending face
    Register {
        /// Pending registration id (see `memora pending`)
        #[arg(long)]
        id: u64,
        #[arg(short, long)]
        name: String,
        /// Defaults to "Stranger"
        #[arg(short, long, default_value = "")]
        relation: String,
    },
    /// Discard the pending face
    Cancel,
    /// List known people
    List,
    /// Reload known people from the store
    Reload,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 10)]
        frames: usize,
    },
}

async fn proxy() -> Result<MemoraProxy<'static>> {
    tracing::debug!("connecting to org.memora.Daemon1 on the session bus");
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    MemoraProxy::new(&conn)
        .await
        .context("memorad is not reachable on org.memora.Daemon1")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => print_json(&proxy().await?.status().await?)?,
        Commands::Detections => {
            let raw = proxy().await?.detections().await?;
            let list: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            if list.is_empty() {
                println!("Nobody in view");
            }
            for d in &list {
                let marker = if d["identified"].as_bool().unwrap_or(false) { "+" } else { "?" };
                println!(
                    "{marker} {} ({}) {}",
                    d["name"].as_str().unwrap_or_default(),
                    d["relation"].as_str().unwrap_or_default(),
                    d["notes"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Frame { save } => {
            let jpeg = proxy().await?.frame().await?;
            if jpeg.is_empty() {
                bail!("no frame published yet");
            }
            std::fs::write(&save, jpeg).with_context(|| format!("writing {}", save.display()))?;
            println!("Saved frame to {}", save.display());
        }
        Commands::Pending { save } => {
            let proxy = proxy().await?;
            let raw = proxy.pending().await?;
            if raw == "null" {
                println!("No pending registration");
                return Ok(());
            }
            print_json(&raw)?;
            if let Some(path) = save {
                let png = proxy.pending_image().await?;
                std::fs::write(&path, png).with_context(|| format!("writing {}", path.display()))?;
                println!("Saved image to {}", path.display());
            }
        }
        Commands::Register { id, name, relation } => {
            let raw = proxy().await?.register(id, &name, &relation).await?;
            print_json(&raw)?;
        }
        Commands::Cancel => {
            if proxy().await?.cancel().await? {
                println!("Pending registration cancelled");
            } else {
                println!("No pending registration");
            }
        }
        Commands::List => print_json(&proxy().await?.list_identities().await?)?,
        Commands::Reload => {
            proxy().await?.reload().await?;
            println!("Reload requested");
        }
        Commands::Devices => {
            let devices = memora_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} [{}] {}", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, frames } => {
            println!("Running camera diagnostics on {device}...");
            let backends = memora_hw::V4l2Backend::default_chain(&device, 640, 480);
            let mut source = memora_hw::FrameSource::open(&backends, 0, false)?;
            println!("Opened via {}", source.backend());

            let started = Instant::now();
            let mut failed = 0usize;
            for _ in 0..frames {
                match source.read_frame() {
                    Ok(frame) => println!(
                        "  seq={} {}x{} brightness={:.1}",
                        frame.sequence,
                        frame.width(),
                        frame.height(),
                        frame.avg_brightness()
                    ),
                    Err(e) => {
                        failed += 1;
                        tracing::debug!(error = ?e, "diagnostic frame read failed");
                        println!("  read failed: {e}");
                    }
                }
            }
            source.close();

            let secs = started.elapsed().as_secs_f32();
            println!(
                "{} frames in {secs:.2}s ({:.1} fps), {failed} failed",
                frames,
                frames as f32 / secs.max(f32::EPSILON)
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_relation_defaults_to_empty() {
        let cli = Cli::try_parse_from(["memora", "register", "--id", "3", "--name", "Alex"]).unwrap();
        match cli.command {
            Commands::Register { id, name, relation } => {
                assert_eq!(id, 3);
                assert_eq!(name, "Alex");
                assert!(relation.is_empty());
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_register_requires_name() {
        assert!(Cli::try_parse_from(["memora", "register", "--id", "3"]).is_err());
    }

    #[test]
    fn test_test_command_defaults() {
        let cli = Cli::try_parse_from(["memora", "test"]).unwrap();
        match cli.command {
            Commands::Test { device, frames } => {
                assert_eq!(device, "/dev/video0");
                assert_eq!(frames, 10);
            }
            _ => panic!("expected test"),
        }
    }
}
