use anyhow::Context;
use rand::RngCore;

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

pub fn random_hex_id(bytes: usize) -> anyhow::Result<String> {
    let mut raw = vec![0_u8; bytes];
    rand::rngs::OsRng
        .try_fill_bytes(&mut raw)
        .context("read OS randomness")?;

    let mut out = String::with_capacity(bytes.saturating_mul(2));
    for b in raw {
        out.push(hex_digit(b >> 4));
        out.push(hex_digit(b & 0x0f));
    }
    Ok(out)
}

pub fn owner_id() -> anyhow::Result<String> {
    random_hex_id(4)
}
