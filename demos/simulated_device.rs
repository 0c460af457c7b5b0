//! Example: A field device driven by a simulated master and analog module
//!
//! Run with: cargo run --example simulated_device
//!
//! This example demonstrates:
//! - Feeding analog module updates over the bridge
//! - Answering identification and process data commands
//! - Commanding a fixed loop current and watching the bridge request it
//! - Handing persistence intents to a (pretend) flash driver

use hart_slave::command::{
    CMD_FIXED_CURRENT, CMD_READ_DYNAMIC_VARIABLES, CMD_READ_UNIQUE_ID, CMD_WRITE_MESSAGE,
};
use hart_slave::utils::{format_hex, pack_ascii};
use hart_slave::{CommandRequest, Device, DeviceConfig, Master, Reply};

fn print_reply(label: &str, reply: &Reply) {
    match reply.frame() {
        Some(frame) => println!("{:<24} {}", label, format_hex(frame)),
        None => println!("{:<24} (silent: {:?})", label, reply),
    }
}

fn main() -> hart_slave::Result<()> {
    // =========================================================================
    // Boot
    // =========================================================================

    let config = DeviceConfig::new(0x00_4D_21)
        .with_tag("FT-101")
        .with_long_tag("Flow transmitter line 4");
    let mut device = Device::new(config)?;

    // =========================================================================
    // Analog module reports PV 50.0, SV 20.0, loop current 12 mA
    // =========================================================================

    println!("=== Bridge ===\n");
    let ack = device.handle_bridge_message(b"U,42480000,41A00000,41400000,00\n");
    println!("update  -> {}", String::from_utf8_lossy(&ack).trim_end());

    // =========================================================================
    // Master reads
    // =========================================================================

    println!("\n=== Reads ===\n");
    let request = CommandRequest::short(Master::Primary, CMD_READ_UNIQUE_ID, &[]);
    let reply = device.handle_frame(&request);
    print_reply("0  read unique id", &reply);

    let reply = device.handle_frame(&CommandRequest::long(
        Master::Primary,
        CMD_READ_DYNAMIC_VARIABLES,
        &[],
    ));
    print_reply("3  dynamic variables", &reply);

    // =========================================================================
    // Fixed current: the next poll carries the request to the module
    // =========================================================================

    println!("\n=== Fixed current ===\n");
    let value = 4.0f32.to_be_bytes();
    let request = CommandRequest::long(Master::Secondary, CMD_FIXED_CURRENT, &value);
    let reply = device.handle_frame(&request);
    print_reply("40 fix at 4 mA", &reply);

    let poll = device.handle_bridge_message(b"P,00\n");
    println!("poll    -> {}", String::from_utf8_lossy(&poll).trim_end());

    let request = CommandRequest::long(Master::Secondary, CMD_FIXED_CURRENT, &[0; 4]);
    let reply = device.handle_frame(&request);
    print_reply("40 leave fixed mode", &reply);

    // =========================================================================
    // Configuration write and flash hand-off
    // =========================================================================

    println!("\n=== Persistence ===\n");
    let message = pack_ascii("CALIBRATED 2024", 24).unwrap_or_default();
    let request = CommandRequest::long(Master::Primary, CMD_WRITE_MESSAGE, &message);
    let reply = device.handle_frame(&request);
    print_reply("17 write message", &reply);

    while let Some(intent) = device.take_persistence_intent() {
        let image = device.identity_image();
        println!("flash {:?}: {} bytes", intent, image.len());
        device.complete_persistence(intent, true);
    }

    Ok(())
}
