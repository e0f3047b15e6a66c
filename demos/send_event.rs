use event_relay::event::{EventReceipt, UserEvent};
use event_relay::host::Registration;
use event_relay::{Config, EventSendResult};
use std::sync::mpsc::channel;
use std::sync::Arc;

fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let relay = Config::from_env().unwrap().start().unwrap();
    let registration = Registration::new();
    let client = registration.connect();
    registration.register(Arc::new(relay)).unwrap();

    let event = UserEvent::view("demo-user", "https://example.com/", Some("Home - Example.com"));
    event.validate().unwrap();
    let message = event.to_request().unwrap().to_message();

    let (tx, rx) = channel();
    if let Some(in_flight) = registration.post_message(client, &message, tx) {
        in_flight.wait();
    }
    match rx.recv() {
        Ok(result @ EventSendResult::Sent { .. }) => match EventReceipt::from_result(&result) {
            Some(Ok(receipt)) => println!("stored as event {}", receipt.event_id),
            _ => println!("{}", result.to_message()),
        },
        Ok(result) => println!("{}", result.to_message()),
        Err(_) => println!("no reply (is EVENT_RELAY_ENABLED off?)"),
    }
}
