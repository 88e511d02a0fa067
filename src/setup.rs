use dialoguer::{Confirm, Input, Password};
use eyre::{Result, WrapErr};

/// Prompt for a secret without echoing it
pub fn prompt_secret(prompt: &str) -> Result<String> {
    let value = Password::new()
        .with_prompt(prompt)
        .interact()
        .wrap_err("Failed to read secret")?;

    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        return Err(eyre::eyre!("Input cannot be empty"));
    }
    Ok(trimmed)
}

/// Prompt for a new passphrase, asking twice
pub fn prompt_new_passphrase() -> Result<String> {
    Password::new()
        .with_prompt("Wallet passphrase")
        .with_confirmation("Repeat passphrase", "Passphrases do not match")
        .interact()
        .wrap_err("Failed to read passphrase")
}

pub fn prompt_string(prompt: &str) -> Result<String> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .interact_text()
        .wrap_err("Failed to read input")?;
    Ok(value.trim().to_string())
}

pub fn prompt_yes_no(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .wrap_err("Failed to read answer")
}

/// Show the last characters of an identifier, e.g. a wallet id
pub fn short_id(id: &str) -> &str {
    let start = id.len().saturating_sub(8);
    id.get(start..).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "89abcdef");
        assert_eq!(short_id("abc"), "abc");
    }
}
