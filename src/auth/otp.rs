use rand::Rng;
use time::OffsetDateTime;

pub const OTP_LEN: usize = 6;

/// Fresh 6-digit numeric code, zero padded.
pub fn generate() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

pub fn is_well_formed(otp: &str) -> bool {
    otp.len() == OTP_LEN && otp.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_expired(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    now >= expires_at
}
