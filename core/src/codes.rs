use rand::Rng;

pub const OTP_CODE_LENGTH: usize = 6;
pub const REFERRAL_PREFIX: &str = "HB";

/// Generate a numeric one-time code of `length` digits. The first digit is
/// never zero so the code keeps its length when read back as a number.
pub fn generate_otp_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|position| {
            let digit = if position == 0 {
                rng.gen_range(1..=9)
            } else {
                rng.gen_range(0..=9)
            };
            char::from(b'0' + digit)
        })
        .collect()
}

/// Build a referral code candidate: `HB` + last two phone digits + three
/// random digits. Candidates are not unique on their own; callers retry
/// against the profile store until an unused one comes up.
pub fn referral_code_candidate(phone: &str) -> String {
    let suffix: String = (0..3)
        .map(|_| char::from(b'0' + rand::thread_rng().gen_range(0..=9)))
        .collect();
    format_referral_code(phone, &suffix)
}

pub fn format_referral_code(phone: &str, random_digits: &str) -> String {
    let tail = phone
        .char_indices()
        .rev()
        .nth(1)
        .map(|(idx, _)| &phone[idx..])
        .unwrap_or(phone);
    format!("{REFERRAL_PREFIX}{tail}{random_digits}").to_uppercase()
}

/// Constant-time comparison for submitted codes.
pub fn codes_match(expected: &str, submitted: &str) -> bool {
    let expected = expected.as_bytes();
    let submitted = submitted.as_bytes();
    if expected.len() != submitted.len() {
        return false;
    }
    expected
        .iter()
        .zip(submitted)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
