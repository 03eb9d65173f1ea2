use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use kiosklink::KioskConfig;

use crate::cmd::ConfigArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

pub fn run(_args: ConfigArgs, config: KioskConfig, format: OutputFormat) -> CliResult<i32> {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&config),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SETTING", "VALUE"]);
            for (key, value) in settings(&config) {
                table.add_row(vec![key.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in settings(&config) {
                println!("{key} = {value}");
            }
        }
    }
    Ok(SUCCESS)
}

fn settings(config: &KioskConfig) -> Vec<(&'static str, String)> {
    vec![
        ("control", config.channel_config().addr),
        ("video.transport", config.transport().as_str().to_string()),
        ("udp.port", config.udp.video_port().to_string()),
        (
            "video.tcp",
            format!("{}:{}", config.video.tcp_host, config.video.tcp_port),
        ),
        (
            "network.timeout",
            format!("{}ms", config.connect_timeout().as_millis()),
        ),
    ]
}
