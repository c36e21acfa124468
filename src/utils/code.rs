// src/utils/code.rs

use rand::Rng;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 6;

/// Generates a random join code: 6 characters from A-Z and 0-9.
/// Uniqueness is enforced by the database; callers retry on collision.
pub fn gen_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
