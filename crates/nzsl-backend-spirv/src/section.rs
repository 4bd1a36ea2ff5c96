//! SPIR-V word-stream sections.
//!
//! A module is assembled from ordered sections (header, debug info,
//! annotations, declarations, functions) that are merged at the end; every
//! instruction is a word count + opcode word followed by its operands.

/// One ordered run of SPIR-V instructions.
#[derive(Default)]
pub struct Section {
    words: Vec<u32>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw word (header fields).
    pub fn raw(&mut self, word: u32) {
        self.words.push(word);
    }

    /// Appends one instruction.
    pub fn instruction(&mut self, opcode: u16, operands: &[u32]) {
        let word_count = (operands.len() + 1) as u32;
        self.words.push((word_count << 16) | u32::from(opcode));
        self.words.extend_from_slice(operands);
    }

    /// Appends one instruction whose trailing operand is a literal string.
    pub fn instruction_str(&mut self, opcode: u16, operands: &[u32], text: &str) {
        let encoded = encode_string(text);
        let word_count = (operands.len() + encoded.len() + 1) as u32;
        self.words.push((word_count << 16) | u32::from(opcode));
        self.words.extend_from_slice(operands);
        self.words.extend_from_slice(&encoded);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Moves this section's words onto the end of an output stream.
    pub fn merge_into(self, output: &mut Vec<u32>) {
        output.extend(self.words);
    }
}

/// Packs a UTF-8 string into little-endian words with a null terminator.
pub fn encode_string(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunked by 4")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_encodes_word_count_and_opcode() {
        let mut section = Section::new();
        section.instruction(17, &[1]); // OpCapability Shader
        assert_eq!(section.words(), &[(2 << 16) | 17, 1]);
    }

    #[test]
    fn string_padding_includes_terminator() {
        // "main" + NUL fills exactly more than one word
        assert_eq!(encode_string("main").len(), 2);
        assert_eq!(encode_string("abc").len(), 1);
        assert_eq!(encode_string("").len(), 1);
        let words = encode_string("main");
        assert_eq!(words[0], u32::from_le_bytes(*b"main"));
        assert_eq!(words[1], 0);
    }

    #[test]
    fn merge_preserves_order() {
        let mut a = Section::new();
        a.raw(1);
        let mut b = Section::new();
        b.raw(2);
        let mut out = Vec::new();
        a.merge_into(&mut out);
        b.merge_into(&mut out);
        assert_eq!(out, vec![1, 2]);
    }
}
