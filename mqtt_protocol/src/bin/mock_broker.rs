use clap::Parser;
use mqtt_protocol::{MockBroker, MockBrokerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Local broker that prints every message it receives")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:1883")]
    bind: String,

    /// Refuse this many CONNECT attempts before accepting (reconnect testing)
    #[arg(long, default_value_t = 0)]
    refuse_first: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("🚀 Starting mock broker with args: {:?}", args);

    MockBroker::new(MockBrokerConfig {
        bind_address: args.bind,
        refuse_first: args.refuse_first,
    })
    .run(|message| {
        println!(
            "[{}] {} {}",
            message.client_id,
            message.topic,
            message.payload_str()
        );
    })?;

    Ok(())
}
