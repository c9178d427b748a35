// MastersCalc - Session key generator
// Prints a random secret for the SESSION_KEY environment variable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use masters_calc::session::generate_secret;

fn main() {
    let key = STANDARD.encode(generate_secret());
    println!("Generated Session Key (base64): {}", key);
}
