use crate::output::print_info;
use unikit_core::{Providers, Result};

pub async fn execute(instance: String, tail: Option<usize>, providers: &Providers) -> Result<()> {
    let provider = providers.provider_for_instance(&instance).await?;
    let logs = provider.get_instance_logs(&instance).await?;

    if logs.is_empty() {
        print_info(&format!("No logs available for {instance}"));
        return Ok(());
    }
    for line in tail_lines(&logs, tail) {
        println!("{line}");
    }
    Ok(())
}

fn tail_lines(logs: &str, tail: Option<usize>) -> Vec<&str> {
    let lines: Vec<&str> = logs.lines().collect();
    match tail {
        Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
        _ => lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines() {
        let logs = "one\ntwo\nthree\n";
        assert_eq!(tail_lines(logs, Some(2)), vec!["two", "three"]);
        assert_eq!(tail_lines(logs, Some(10)).len(), 3);
        assert_eq!(tail_lines(logs, None).len(), 3);
    }
}
