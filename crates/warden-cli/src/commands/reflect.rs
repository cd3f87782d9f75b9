use warden_enforcement::ReflectionScheduler;

/// Run the `reflect-check` subcommand.
pub fn run(text: &str, json: bool) -> anyhow::Result<()> {
    let validation = ReflectionScheduler::validate_reflection_response(text);
    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
        return Ok(());
    }

    if validation.valid {
        println!("Reflection OK");
    } else {
        println!("Reflection rejected:");
        for issue in &validation.issues {
            println!("  - {issue}");
        }
    }
    Ok(())
}
