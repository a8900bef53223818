use std::fmt;

/// A rel32 displacement that no longer fits in 32 bits. Only reachable when
/// the emitted stream outgrows `codegen::MAX_CODE_BYTES`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplacementOverflow;

impl fmt::Display for DisplacementOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch displacement exceeds 32-bit range")
    }
}

impl std::error::Error for DisplacementOverflow {}

/// Write-only x86-64 instruction sink. Tracks the number of 8-byte slots
/// pushed on the runtime stack since function entry (the return address
/// counts as one) so the generator can keep RSP 16-byte aligned at calls.
pub struct Emitter {
    code: Vec<u8>,
    depth: i64,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            code: Vec::with_capacity(256),
            depth: 1,
        }
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Append a 32-bit immediate, least significant byte first.
    pub fn emit_imm32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a 64-bit immediate, least significant byte first.
    pub fn emit_imm64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_depth_delta(&mut self, delta: i64) {
        self.depth += delta;
    }

    /// Whether RSP is 16-byte aligned at the current emission point.
    pub fn depth_parity(&self) -> bool {
        self.depth % 2 == 0
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn push_rdi(&mut self) {
        self.emit_bytes(&[0x57]); // push rdi
        self.push_depth_delta(1);
    }

    pub fn push_rsi(&mut self) {
        self.emit_bytes(&[0x56]); // push rsi
        self.push_depth_delta(1);
    }

    pub fn pop_rdi(&mut self) {
        self.emit_bytes(&[0x5F]); // pop rdi
        self.push_depth_delta(-1);
    }

    pub fn pop_rsi(&mut self) {
        self.emit_bytes(&[0x5E]); // pop rsi
        self.push_depth_delta(-1);
    }

    pub fn sub_rsp_8(&mut self) {
        self.emit_bytes(&[0x48, 0x83, 0xEC, 0x08]); // sub rsp, 8
        self.push_depth_delta(1);
    }

    pub fn add_rsp_8(&mut self) {
        self.emit_bytes(&[0x48, 0x83, 0xC4, 0x08]); // add rsp, 8
        self.push_depth_delta(-1);
    }

    pub fn mov_rax_imm64(&mut self, value: u64) {
        self.emit_bytes(&[0x48, 0xB8]); // mov rax, imm64
        self.emit_imm64(value);
    }

    pub fn mov_edx_imm32(&mut self, value: u32) {
        self.emit_bytes(&[0xBA]); // mov edx, imm32
        self.emit_imm32(value);
    }

    pub fn call_rax(&mut self) {
        self.emit_bytes(&[0xFF, 0xD0]); // call rax
    }

    pub fn test_eax_eax(&mut self) {
        self.emit_bytes(&[0x85, 0xC0]); // test eax, eax
    }

    /// Emit `jne rel32` with a zero displacement and return the offset of the
    /// displacement for later patching.
    pub fn jne_rel32(&mut self) -> usize {
        self.emit_bytes(&[0x0F, 0x85]); // jne rel32
        let disp = self.code.len();
        self.emit_bytes(&[0, 0, 0, 0]);
        disp
    }

    pub fn patch_rel32(
        &mut self,
        disp_offset: usize,
        target: usize,
    ) -> Result<(), DisplacementOverflow> {
        let rel = (target as i64) - ((disp_offset + 4) as i64);
        let rel = i32::try_from(rel).map_err(|_| DisplacementOverflow)?;
        self.code[disp_offset..disp_offset + 4].copy_from_slice(&rel.to_le_bytes());
        Ok(())
    }

    pub fn ret(&mut self) {
        self.emit_bytes(&[0xC3]); // ret
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}
