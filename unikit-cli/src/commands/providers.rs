use crate::output::{OutputFormat, OutputFormatter, print_warning};
use serde::Serialize;
use tabled::Tabled;
use unikit_core::{Config, Providers, Result};

#[derive(Serialize, Tabled)]
struct ProviderRow {
    name: String,
    partition_tables: bool,
    compilers: String,
}

pub fn execute(config: &Config, providers: &Providers, format: OutputFormat) -> Result<()> {
    if providers.is_empty() {
        print_warning("No providers configured. Add a 'providers' section to the configuration.");
        return Ok(());
    }

    let compilers = unikit_compilers::default_compilers(&config.build).keys();
    let rows: Vec<ProviderRow> = providers
        .iter()
        .map(|provider| {
            let targeting: Vec<String> = compilers
                .iter()
                .filter(|key| key.target == provider.name())
                .map(|key| key.to_string())
                .collect();
            ProviderRow {
                name: provider.name().to_string(),
                partition_tables: provider.config().use_partition_tables,
                compilers: if targeting.is_empty() {
                    "-".to_string()
                } else {
                    targeting.join(", ")
                },
            }
        })
        .collect();

    println!("{}", format.format_table(rows));
    Ok(())
}
