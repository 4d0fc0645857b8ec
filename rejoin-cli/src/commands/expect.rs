//! Print the expected final window.

use anyhow::{Context, Result};
use rejoin_core::ExpectedWindow;

/// Run the expect command.
pub fn run(last: u64, width: usize, stride: u64) -> Result<()> {
    let (payload, framed) = render(last, width, stride)?;
    println!("payload: {}", payload);
    println!("framed:  {}", framed);
    Ok(())
}

/// Expected payload and its framed form as hex.
fn render(last: u64, width: usize, stride: u64) -> Result<(String, String)> {
    let window =
        ExpectedWindow::for_sequence(last, width, stride).context("Invalid window parameters")?;
    if !window.is_full() {
        anyhow::bail!(
            "A sequence of {} cannot fill a window of {} (stride {})",
            last,
            width,
            stride
        );
    }
    let framed = window.framed().context("Failed to frame payload")?;
    Ok((window.payload(), hex::encode(framed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_window() {
        let (payload, framed) = render(200, 6, 2).unwrap();
        assert_eq!(payload, "[200,198,196,194,192,190]");
        assert!(framed.starts_with("00000019"));
        assert_eq!(framed.len(), (4 + 25) * 2);
    }

    #[test]
    fn odd_length_ends_on_even_value() {
        let (payload, _) = render(41, 3, 2).unwrap();
        assert_eq!(payload, "[40,38,36]");
    }

    #[test]
    fn short_sequence_is_rejected() {
        assert!(render(5, 6, 2).is_err());
        assert!(render(200, 0, 2).is_err());
    }
}
