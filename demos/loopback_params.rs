//! Two simulated devices exchange a parameter GET over the parameter
//! registry, with the engine/broker/dispatcher plumbing wired exactly
//! as a real link-backed deployment would be — the only stand-in here
//! is `support::DirectLink`, which replaces the radio.

#[path = "support.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use rdtlink::broker::RequestBroker;
use rdtlink::config::EngineConfig;
use rdtlink::params::ParamRegistry;

const MSG_TYPE_FIRMWARE_VERSION: u8 = 20;

fn main() {
    env_logger::init();

    let sensor = support::build_node(EngineConfig::default());
    let controller = support::build_node(EngineConfig::default());
    support::connect(&sensor, &controller);
    support::pair_directly(&sensor, &controller);

    // The sensor side answers GET(20) with a fixed firmware version.
    let sensor_broker = Arc::new(RequestBroker::new(sensor.engine.clone()));
    let sensor_params = ParamRegistry::new(sensor.engine.clone(), sensor_broker);
    sensor_params.register(
        MSG_TYPE_FIRMWARE_VERSION,
        Some(Box::new(|| (vec![0x01, 0x04, 0x02], 0))),
        None,
    );
    sensor_params.spawn();

    // The controller side issues the GET.
    let controller_broker = Arc::new(RequestBroker::new(controller.engine.clone()));
    let controller_params = ParamRegistry::new(controller.engine.clone(), controller_broker);
    controller_params.spawn();

    let mut resp = [0u8; 16];
    match controller_params.get(MSG_TYPE_FIRMWARE_VERSION, &mut resp, Duration::from_secs(2)) {
        Ok((len, code)) => println!("firmware version: {:?} (return_code={})", &resp[..len], code),
        Err(err) => println!("get failed: {}", err),
    }
}
