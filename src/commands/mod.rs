//! Command implementations

pub mod cfi;
pub mod erase;
pub mod program;
pub mod read;
pub mod sweep;

/// Print words as an address-prefixed hex dump, eight words per line
pub fn print_words(base: u32, words: &[u16]) {
    for (i, chunk) in words.chunks(8).enumerate() {
        let line: Vec<String> = chunk.iter().map(|w| format!("{:04X}", w)).collect();
        println!("{:08X}: {}", base + (i * 8) as u32, line.join(" "));
    }
}
