//! Listing of register profiles

use colored::*;

use meterbus_core::config::BusConfig;
use meterbus_core::error::MeterbusResult;
use meterbus_core::profile::{FieldLayout, RegisterProfile};
use meterbus_library::profiles;

fn layout_name(layout: &FieldLayout) -> String {
    match layout {
        FieldLayout::Single => "u16".to_string(),
        FieldLayout::SingleSigned => "i16".to_string(),
        FieldLayout::Pair { order, signed } => {
            format!("{}32 {:?}", if *signed { "i" } else { "u" }, order)
        }
        FieldLayout::HighByte => "hi8".to_string(),
        FieldLayout::LowByte => "lo8".to_string(),
        FieldLayout::Flag => "flag".to_string(),
    }
}

/// Built-in profiles plus any the config file declares; config wins on name
pub fn collect(config: Option<&BusConfig>) -> Vec<RegisterProfile> {
    let mut all = profiles::all_builtin();
    if let Some(config) = config {
        for custom in config.profiles.values() {
            match all.iter_mut().find(|p| p.name == custom.name) {
                Some(existing) => *existing = custom.clone(),
                None => all.push(custom.clone()),
            }
        }
    }
    all
}

/// Print profiles and their quantities
pub fn list_profiles(config: Option<&BusConfig>, verbose: bool, json: bool) -> MeterbusResult<()> {
    let all = collect(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    println!("{}", "Register profiles:".green().bold());
    println!();
    for profile in &all {
        println!(
            "  {} {}",
            profile.name.white().bold(),
            profile.description.dimmed()
        );
        println!(
            "    {} {:?}, {} quantities",
            "Space:".dimmed(),
            profile.space,
            profile.quantities.len()
        );
        if !verbose {
            continue;
        }
        for q in &profile.quantities {
            println!(
                "      {:<24} 0x{:04X} {:<14} x{:<8} {}",
                q.name.cyan(),
                q.address,
                layout_name(&q.layout),
                q.scale,
                q.unit
            );
        }
        for s in &profile.settings {
            println!(
                "      {:<24} 0x{:04X} {:<14} x{:<8} {}",
                s.name.yellow(),
                s.address,
                "setting",
                s.scale,
                s.unit
            );
        }
    }
    println!();
    println!("  {} {} profile(s)", "Total:".dimmed(), all.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_profile_replaces_builtin() {
        let mut config = BusConfig::new();
        let mut custom = profiles::pzem003();
        custom.description = "bench unit".to_string();
        config.add_profile(custom);

        let mut extra = profiles::pzem003();
        extra.name = "bench".to_string();
        config.add_profile(extra);

        let all = collect(Some(&config));
        assert_eq!(all.len(), profiles::BUILTIN_NAMES.len() + 1);
        let pzem003 = all.iter().find(|p| p.name == "pzem003").unwrap();
        assert_eq!(pzem003.description, "bench unit");
        assert_eq!(collect(None).len(), profiles::BUILTIN_NAMES.len());
    }
}
