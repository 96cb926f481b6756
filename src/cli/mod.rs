use clap::{Arg, ArgAction, Command};

pub mod commands;

pub use commands::handle_subcommands;

fn slave_arg() -> Arg {
    Arg::new("slave")
        .help("Slave address (0 broadcasts writes)")
        .required(true)
}

fn address_arg() -> Arg {
    Arg::new("address")
        .help("Starting address, decimal or 0x-prefixed hex")
        .required(true)
}

fn read_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(slave_arg())
        .arg(address_arg())
        .arg(Arg::new("quantity").help("Number of items to read").required(true))
}

pub fn build_cli() -> Command {
    Command::new("rtu-modbus")
        .version(crate::VERSION)
        .about("Poll-driven Modbus RTU master and slave over a serial line")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("TOML configuration file")
                .global(true),
        )
        .arg(Arg::new("port").short('p').long("port").help("Serial port").global(true))
        .arg(Arg::new("baud").short('b').long("baud").help("Baud rate").global(true))
        .arg(
            Arg::new("parity")
                .long("parity")
                .help("Parity: none, even or odd")
                .global(true),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .help("Extra attempts after a failed transaction")
                .global(true),
        )
        .arg(
            Arg::new("response-timeout")
                .long("response-timeout")
                .help("Milliseconds to wait for a reply")
                .global(true),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .help("Output format")
                .value_parser(["console", "json", "csv", "hex"])
                .default_value("console")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("ports").about("List available serial ports"))
        .subcommand(
            Command::new("crc")
                .about("Compute the Modbus CRC of a hex string")
                .arg(Arg::new("data").help("Bytes as hex, e.g. 010300000002").required(true)),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write a configuration file with default settings")
                .arg(Arg::new("path").required(true)),
        )
        .subcommand(read_command("read-coils", "Read coils (0x01)"))
        .subcommand(read_command("read-holding", "Read holding registers (0x03)"))
        .subcommand(read_command("read-input", "Read input registers (0x04)"))
        .subcommand(
            Command::new("write-coil")
                .about("Write a single coil (0x05)")
                .arg(slave_arg())
                .arg(address_arg())
                .arg(Arg::new("value").help("on/off, true/false or 1/0").required(true)),
        )
        .subcommand(
            Command::new("write-register")
                .about("Write a single holding register (0x06)")
                .arg(slave_arg())
                .arg(address_arg())
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(
            Command::new("write-coils")
                .about("Write multiple coils (0x0F)")
                .arg(slave_arg())
                .arg(address_arg())
                .arg(Arg::new("values").num_args(1..).required(true)),
        )
        .subcommand(
            Command::new("write-registers")
                .about("Write multiple holding registers (0x10)")
                .arg(slave_arg())
                .arg(address_arg())
                .arg(Arg::new("values").num_args(1..).required(true)),
        )
        .subcommand(
            Command::new("read-file-record")
                .about("Read one file record (0x14)")
                .arg(slave_arg())
                .arg(Arg::new("file").required(true))
                .arg(Arg::new("record").required(true))
                .arg(Arg::new("length").help("Record length in words").required(true)),
        )
        .subcommand(
            Command::new("slave")
                .about("Serve an in-memory register map until Ctrl+C")
                .arg(
                    Arg::new("unit")
                        .short('u')
                        .long("unit")
                        .help("Address to answer for")
                        .default_value("1"),
                )
                .arg(
                    Arg::new("size")
                        .long("size")
                        .help("Number of coils and of each register type")
                        .default_value("100"),
                ),
        )
}
