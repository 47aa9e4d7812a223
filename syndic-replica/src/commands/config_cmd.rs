use clap::{Args, Subcommand, ValueEnum};
use std::fs;
use std::io::Write;

use syndic_replica::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        match &config.producer_url.value {
                            Some(url) => println!("producer.url: {}", url),
                            None => println!("producer.url: (not set)"),
                        }
                        println!("  source: {}", config.producer_url.source);
                        let key = if config.producer_key.value.is_some() {
                            "(set)"
                        } else {
                            "(not set)"
                        };
                        println!("producer.key: {}", key);
                        println!("  source: {}", config.producer_key.source);
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!("media_dir: {}", config.media_dir.value.display());
                        println!("  source: {}", config.media_dir.source);
                        println!();

                        println!("resources:");
                        if config.resources.is_empty() {
                            println!("  (none)");
                        }
                        for resource in &config.resources {
                            let mirror = if resource.local_content {
                                " (local content)"
                            } else {
                                ""
                            };
                            println!("  - {}{}", resource.category, mirror);
                        }
                        println!(
                            "include_global_presentation: {}",
                            config.include_global_presentation
                        );
                        println!();

                        println!("sync.interval_secs: {}", config.sync.interval_secs);
                        println!(
                            "sync.request_timeout_secs: {}",
                            config.sync.request_timeout_secs
                        );
                        println!(
                            "sync.cycle_deadline_secs: {}",
                            config.sync.cycle_deadline_secs
                        );
                        println!("sync.per_page: {}", config.sync.per_page);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = Config::default_config_path();

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'syndic-replica config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let default_config = r#"# syndic-replica configuration

producer:
  url: http://localhost:8080
  # key: shared-secret

# Path to SQLite database (default: platform data dir)
# database_path: replica.db

# Directory for mirrored media (default: platform data dir)
# media_dir: media

resources:
  - category: articles
    local_content: true

include_global_presentation: true

sync:
  interval_secs: 600
  request_timeout_secs: 15
  cycle_deadline_secs: 300
  per_page: 100
"#;

                let mut file = fs::File::create(&config_path)?;
                file.write_all(default_config.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to point at your Producer.");
                Ok(())
            }
        }
    }
}
