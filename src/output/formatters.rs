use chrono::Utc;

use crate::modbus::protocol::{FunctionCode, NormalResponse};
use crate::services::master_service::{MasterEvent, Outcome};

pub trait EventFormatter: Send + Sync {
    fn format_header(&self) -> String;
    fn format_event(&self, event: &MasterEvent) -> String;

    fn format(&self, events: &[MasterEvent]) -> String {
        let mut output = self.format_header();
        for event in events {
            output.push_str(&self.format_event(event));
        }
        output
    }
}

/// Picks a formatter by its command line name; anything unknown is console.
pub fn formatter_for(name: &str) -> Box<dyn EventFormatter> {
    match name {
        "json" => Box::new(JsonFormatter),
        "csv" => Box::new(CsvFormatter),
        "hex" => Box::new(HexFormatter),
        _ => Box::new(ConsoleFormatter),
    }
}

fn is_coil_function(function: FunctionCode) -> bool {
    matches!(
        function,
        FunctionCode::ReadCoils | FunctionCode::WriteSingleCoil | FunctionCode::WriteMultipleCoils
    )
}

fn plain_values(response: &NormalResponse) -> Vec<String> {
    if is_coil_function(response.function) {
        response.coil_values().iter().map(|v| v.to_string()).collect()
    } else {
        response.values.iter().map(|v| v.to_string()).collect()
    }
}

pub struct ConsoleFormatter;

impl EventFormatter for ConsoleFormatter {
    fn format_header(&self) -> String {
        format!("🚀 Modbus RTU transactions - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }

    fn format_event(&self, event: &MasterEvent) -> String {
        let time = event.timestamp.format("%H:%M:%S%.3f");
        match &event.outcome {
            Outcome::Response(r) => {
                let mut output = format!(
                    "✅ [{}] Slave {} {} @ {}\n",
                    time, r.slave_address, r.function, r.address
                );
                for (offset, value) in plain_values(r).iter().enumerate() {
                    output.push_str(&format!("   {:>5}: {}\n", r.address as usize + offset, value));
                }
                output
            }
            Outcome::Exception(e) => format!("⚠️  [{}] {}\n", time, e),
            Outcome::Timeout(request) => format!(
                "⏰ [{}] Slave {} {} timed out\n",
                time, request.slave_address, request.function
            ),
        }
    }
}

pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn format_header(&self) -> String {
        String::new() // JSON doesn't need headers
    }

    fn format_event(&self, event: &MasterEvent) -> String {
        let mut line = serde_json::to_string(event).unwrap_or_default();
        line.push('\n');
        line
    }

    fn format(&self, events: &[MasterEvent]) -> String {
        let result = serde_json::json!({
            "timestamp": Utc::now().timestamp(),
            "events": events,
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }
}

pub struct CsvFormatter;

impl EventFormatter for CsvFormatter {
    fn format_header(&self) -> String {
        "Timestamp,Slave,Function,Outcome,Address,Values\n".to_string()
    }

    fn format_event(&self, event: &MasterEvent) -> String {
        let timestamp = event.timestamp.to_rfc3339();
        match &event.outcome {
            Outcome::Response(r) => format!(
                "{},{},0x{:02X},ok,{},{}\n",
                timestamp,
                r.slave_address,
                r.function.value(),
                r.address,
                plain_values(r).join(" ")
            ),
            Outcome::Exception(e) => format!(
                "{},{},0x{:02X},exception 0x{:02X},,\n",
                timestamp,
                e.slave_address,
                e.function_code().value(),
                e.code
            ),
            Outcome::Timeout(request) => format!(
                "{},{},0x{:02X},timeout,{},\n",
                timestamp,
                request.slave_address,
                request.function.value(),
                request.address
            ),
        }
    }
}

pub struct HexFormatter;

impl EventFormatter for HexFormatter {
    fn format_header(&self) -> String {
        format!("🔍 Hex Data Output - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }

    fn format_event(&self, event: &MasterEvent) -> String {
        match &event.outcome {
            Outcome::Response(r) => {
                let words: Vec<String> = r.values.iter().map(|v| format!("0x{:04X}", v)).collect();
                format!(
                    "🔍 Slave {} fn 0x{:02X} @ 0x{:04X}: [{}]\n",
                    r.slave_address,
                    r.function.value(),
                    r.address,
                    words.join(", ")
                )
            }
            Outcome::Exception(e) => format!(
                "🔍 Slave {} fn 0x{:02X}: exception 0x{:02X}\n",
                e.slave_address, e.function, e.code
            ),
            Outcome::Timeout(request) => format!(
                "🔍 Slave {} fn 0x{:02X}: timeout\n",
                request.slave_address,
                request.function.value()
            ),
        }
    }
}
