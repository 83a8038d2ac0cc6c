use apns_h2::{
    Channel, Client, ClientOptions, DefaultNotificationBuilder, Endpoint, NotificationBuilder, NotificationOptions,
    Signer,
};
use argparse::{ArgumentParser, Store, StoreOption, StoreTrue};
use std::fs::File;
use std::time::Duration;

// An example client connecting to APNs with a JWT token
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().init();

    let mut key_file = String::new();
    let mut team_id = String::new();
    let mut key_id = String::new();
    let mut device_tokens: Vec<String> = Vec::new();
    let mut message = String::from("Ch-check it out!");
    let mut sandbox = false;
    let mut topic: Option<String> = None;
    let mut ping_interval: u64 = 60_000;

    {
        let mut ap = ArgumentParser::new();
        ap.set_description("APNs token-based push");
        ap.refer(&mut key_file)
            .add_option(&["-p", "--pkcs8"], Store, "Private key PKCS8");
        ap.refer(&mut team_id)
            .add_option(&["-t", "--team_id"], Store, "APNs team ID");
        ap.refer(&mut key_id)
            .add_option(&["-k", "--key_id"], Store, "APNs key ID");
        ap.refer(&mut device_tokens)
            .add_argument("device_token", argparse::List, "APNs device tokens");
        ap.refer(&mut message)
            .add_option(&["-m", "--message"], Store, "Notification message");
        ap.refer(&mut sandbox)
            .add_option(&["-s", "--sandbox"], StoreTrue, "Use the development APNs servers");
        ap.refer(&mut topic)
            .add_option(&["-o", "--topic"], StoreOption, "APNS topic");
        ap.refer(&mut ping_interval)
            .add_option(&["-i", "--ping_interval"], Store, "Ping interval in milliseconds");
        ap.parse_args_or_exit();
    }

    // Read the private key from disk
    let private_key = File::open(key_file)?;

    // Which service to call, test or production?
    let endpoint = if sandbox {
        Endpoint::Sandbox
    } else {
        Endpoint::Production
    };

    let signer = Signer::new(private_key, key_id, team_id, Duration::from_secs(60 * 55))?;

    let mut options = ClientOptions::new(endpoint)
        .with_signer(signer)
        .with_ping_interval(ping_interval);

    if let Some(topic) = topic {
        options = options.with_default_topic(topic);
    }

    // Connecting to APNs happens on the first send
    let client = Client::new(options)?;

    client.events().on(Channel::Error, |result| {
        println!(
            "Failed: {} ({})",
            result.notification().get_device_token(),
            result.reason().map(|r| r.as_str()).unwrap_or_default()
        );
    });

    // Notification payloads
    let payloads = device_tokens.iter().map(|token| {
        DefaultNotificationBuilder::new()
            .set_body(message.as_str())
            .set_sound("default")
            .set_badge(1u32)
            .build(token.as_str(), NotificationOptions::default())
    });

    // Send the notifications, print the results in order
    for result in client.send_many(payloads).await? {
        println!(
            "{}: {:?} {}",
            result.notification().get_device_token(),
            result.outcome(),
            result.apns_id().unwrap_or_default()
        );
    }

    client.close();

    Ok(())
}
