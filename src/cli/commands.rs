use anyhow::{anyhow, bail, Context};
use clap::ArgMatches;
use log::info;

use crate::config::Config;
use crate::devices::RegisterMap;
use crate::modbus::crc::crc16_modbus;
use crate::output::formatter_for;
use crate::services::{MasterService, SlaveService};

/// Parses a decimal or 0x-prefixed hex number into any unsigned width.
fn parse_number<T: TryFrom<u32>>(text: &str) -> anyhow::Result<T> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    }
    .with_context(|| format!("Invalid number: {}", text))?;

    T::try_from(value).map_err(|_| anyhow!("Number out of range: {}", text))
}

fn parse_coil(text: &str) -> anyhow::Result<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        other => bail!("Invalid coil value: {}", other),
    }
}

fn arg<T: TryFrom<u32>>(matches: &ArgMatches, name: &str) -> anyhow::Result<T> {
    let text = matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("Missing argument: {}", name))?;
    parse_number(text)
}

fn values(matches: &ArgMatches) -> Vec<&String> {
    matches
        .get_many::<String>("values")
        .map(|v| v.collect())
        .unwrap_or_default()
}

fn list_serial_ports() -> anyhow::Result<()> {
    println!("📡 Available Serial Ports:");

    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("   ⚠️  No serial ports found");
        return Ok(());
    }

    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port.port_name);
        if let serialport::SerialPortType::UsbPort(usb_info) = &port.port_type {
            if let Some(manufacturer) = &usb_info.manufacturer {
                println!("      📱 Manufacturer: {}", manufacturer);
            }
            if let Some(serial_number) = &usb_info.serial_number {
                println!("      🔢 Serial Number: {}", serial_number);
            }
        }
    }
    Ok(())
}

fn print_crc(data: &str) -> anyhow::Result<()> {
    let cleaned: String = data
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("Invalid hex: {}", data))?;
    let crc = crc16_modbus(&bytes);

    println!("🔢 CRC: 0x{:04X}", crc);
    println!("📋 Frame: {}{:02X}{:02X}", cleaned.to_uppercase(), crc & 0xFF, crc >> 8);
    Ok(())
}

/// Queues the request a master subcommand asks for. Returns false when
/// `name` is not a master subcommand.
fn queue_request(service: &mut MasterService, name: &str, matches: &ArgMatches) -> anyhow::Result<bool> {
    let master = service.master_mut();
    match name {
        "read-coils" => master.read_coils(arg(matches, "slave")?, arg(matches, "address")?, arg(matches, "quantity")?),
        "read-holding" => {
            master.read_holding_registers(arg(matches, "slave")?, arg(matches, "address")?, arg(matches, "quantity")?)
        }
        "read-input" => {
            master.read_input_registers(arg(matches, "slave")?, arg(matches, "address")?, arg(matches, "quantity")?)
        }
        "write-coil" => {
            let value = matches
                .get_one::<String>("value")
                .ok_or_else(|| anyhow!("Missing argument: value"))?;
            master.write_single_coil(arg(matches, "slave")?, arg(matches, "address")?, parse_coil(value)?)
        }
        "write-register" => {
            master.write_single_register(arg(matches, "slave")?, arg(matches, "address")?, arg(matches, "value")?)
        }
        "write-coils" => {
            let coils = values(matches)
                .into_iter()
                .map(|v| parse_coil(v))
                .collect::<anyhow::Result<Vec<bool>>>()?;
            master.write_multiple_coils(arg(matches, "slave")?, arg(matches, "address")?, &coils)?
        }
        "write-registers" => {
            let registers = values(matches)
                .into_iter()
                .map(|v| parse_number::<u16>(v))
                .collect::<anyhow::Result<Vec<u16>>>()?;
            master.write_multiple_registers(arg(matches, "slave")?, arg(matches, "address")?, &registers)?
        }
        "read-file-record" => master.read_file_record(
            arg(matches, "slave")?,
            arg(matches, "file")?,
            arg(matches, "record")?,
            arg(matches, "length")?,
        ),
        _ => return Ok(false),
    }
    Ok(true)
}

const MASTER_COMMANDS: [&str; 8] = [
    "read-coils",
    "read-holding",
    "read-input",
    "write-coil",
    "write-register",
    "write-coils",
    "write-registers",
    "read-file-record",
];

pub async fn handle_subcommands(matches: &ArgMatches, config: &Config) -> anyhow::Result<bool> {
    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("console");

    if matches.subcommand_matches("ports").is_some() {
        list_serial_ports()?;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("crc") {
        let data = matches
            .get_one::<String>("data")
            .ok_or_else(|| anyhow!("Missing argument: data"))?;
        print_crc(data)?;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("init-config") {
        let path = matches
            .get_one::<String>("path")
            .ok_or_else(|| anyhow!("Missing argument: path"))?;
        config.save_to_file(path)?;
        println!("✅ Configuration written to {}", path);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("slave") {
        let unit: u8 = arg(matches, "unit")?;
        let size: usize = arg::<u32>(matches, "size")? as usize;

        info!("🏭 Serving unit {} with {} items per table on {}", unit, size, config.serial_port);
        let mut service = SlaveService::open(config, RegisterMap::new(size), unit)?;
        service.run().await;
        println!("📊 {} write(s) served", service.listener().write_count());
        return Ok(true);
    }

    for name in MASTER_COMMANDS {
        if let Some(matches) = matches.subcommand_matches(name) {
            let mut service = MasterService::open(config)?;
            queue_request(&mut service, name, matches)?;
            let events = service.run().await;
            print!("{}", formatter_for(format).format(&events));
            return Ok(true);
        }
    }

    Ok(false)
}
