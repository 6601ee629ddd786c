//! Instruction fetch/decode/execute and the interrupt dispatcher.
//!
//! One `step` fetches a 16-bit word from flash at `pc*2`, decodes it against
//! the AVR opcode subset needed for compiled Arduino output, executes it
//! against the `McuState`'s unified data space, and returns the number of
//! cycles it retired. Unknown opcodes are downgraded to a 1-cycle NOP
//! rather than surfaced as an error.

use crate::io_regs as io;
use crate::mcu::McuState;

const SREG_C: u8 = 1 << 0;
const SREG_Z: u8 = 1 << 1;
const SREG_N: u8 = 1 << 2;
const SREG_V: u8 = 1 << 3;
const SREG_S: u8 = 1 << 4;
const SREG_H: u8 = 1 << 5;
const SREG_T: u8 = 1 << 6;
const SREG_I: u8 = 1 << 7;

pub struct Cpu;

impl Cpu {
    fn fetch16(mcu: &McuState, pc: u16) -> u16 {
        let addr = pc as usize * 2;
        if addr + 1 >= mcu.flash.len() {
            return 0; // NOP past the end of flash
        }
        mcu.flash[addr] as u16 | ((mcu.flash[addr + 1] as u16) << 8)
    }

    fn push16(mcu: &mut McuState, value: u16) {
        let mut sp = mcu.sp();
        mcu.data_write(sp, (value >> 8) as u8);
        sp = sp.wrapping_sub(1);
        mcu.data_write(sp, (value & 0xFF) as u8);
        sp = sp.wrapping_sub(1);
        mcu.sp_set(sp);
    }

    fn pop16(mcu: &mut McuState) -> u16 {
        let mut sp = mcu.sp();
        sp = sp.wrapping_add(1);
        let lo = mcu.data_read(sp);
        sp = sp.wrapping_add(1);
        let hi = mcu.data_read(sp);
        mcu.sp_set(sp);
        (lo as u16) | ((hi as u16) << 8)
    }

    fn push8(mcu: &mut McuState, value: u8) {
        let sp = mcu.sp();
        mcu.data_write(sp, value);
        mcu.sp_set(sp.wrapping_sub(1));
    }

    fn pop8(mcu: &mut McuState) -> u8 {
        let sp = mcu.sp().wrapping_add(1);
        mcu.sp_set(sp);
        mcu.data_read(sp)
    }

    /// Check the flag/enable pairs in priority order and dispatch the
    /// highest-priority pending-and-enabled source. Returns the cycles spent
    /// (4) if an interrupt was dispatched, 0 otherwise.
    pub fn dispatch_interrupt(mcu: &mut McuState) -> u32 {
        if mcu.sreg & SREG_I == 0 {
            return 0;
        }
        // (tifr/ucsr register, flag bit, enable register, enable bit, vector, edge-clear)
        let sources: [(usize, u8, usize, u8, u16, bool); 11] = [
            (io::TIFR2, 0b010, io::TIMSK2, 0b010, 0x07, true), // Timer2 compA
            (io::TIFR2, 0b100, io::TIMSK2, 0b100, 0x08, true), // Timer2 compB
            (io::TIFR2, 0b001, io::TIMSK2, 0b001, 0x09, true), // Timer2 ovf
            (io::TIFR1, 0b010, io::TIMSK1, 0b010, 0x0B, true), // Timer1 compA
            (io::TIFR1, 0b100, io::TIMSK1, 0b100, 0x0C, true), // Timer1 compB
            (io::TIFR1, 0b001, io::TIMSK1, 0b001, 0x0D, true), // Timer1 ovf
            (io::TIFR0, 0b010, io::TIMSK0, 0b010, 0x0E, true), // Timer0 compA
            (io::TIFR0, 0b100, io::TIMSK0, 0b100, 0x0F, true), // Timer0 compB
            (io::TIFR0, 0b001, io::TIMSK0, 0b001, 0x10, true), // Timer0 ovf
            (io::UCSR0A, 0b1000_0000, io::UCSR0B, 0b1000_0000, 0x12, false), // USART0 RXC (level)
            (io::UCSR0A, 0b0010_0000, io::UCSR0B, 0b0010_0000, 0x13, false), // USART0 DRE (level)
        ];
        for &(flag_reg, flag_bit, en_reg, en_bit, vector, edge) in sources.iter() {
            if mcu.io[flag_reg] & flag_bit != 0 && mcu.io[en_reg] & en_bit != 0 {
                return Self::vector_to(mcu, vector, flag_reg, flag_bit, edge);
            }
        }
        // USART0 TXC (edge) and ADC complete, handled separately since TXC
        // lives in UCSR0A alongside RXC/DRE but clears on write-1, and ADC
        // is its own register pair.
        if mcu.io[io::UCSR0A] & 0b0100_0000 != 0 && mcu.io[io::UCSR0B] & 0b0100_0000 != 0 {
            return Self::vector_to(mcu, 0x14, io::UCSR0A, 0b0100_0000, true);
        }
        if mcu.io[io::ADCSRA] & 0b0001_0000 != 0 && mcu.io[io::ADCSRA] & 0b0000_1000 != 0 {
            return Self::vector_to(mcu, 0x15, io::ADCSRA, 0b0001_0000, true);
        }
        0
    }

    fn vector_to(mcu: &mut McuState, vector: u16, flag_reg: usize, flag_bit: u8, edge: bool) -> u32 {
        Self::push16(mcu, mcu.pc);
        mcu.sreg &= !SREG_I;
        mcu.io[io::SREG] = mcu.sreg;
        if edge {
            mcu.io[flag_reg] &= !flag_bit;
        }
        mcu.pc = vector;
        mcu.diagnostics.interrupt_dispatch_count += 1;
        4
    }

    /// Fetch, decode, and execute the instruction at `mcu.pc`. Returns the
    /// number of cycles retired.
    pub fn step(mcu: &mut McuState) -> u32 {
        mcu.sreg = mcu.io[io::SREG];
        let opcode = Self::fetch16(mcu, mcu.pc);
        mcu.pc = mcu.pc.wrapping_add(1);
        let cycles = Self::execute(mcu, opcode);
        mcu.io[io::SREG] = mcu.sreg;
        cycles
    }

    fn execute(mcu: &mut McuState, op: u16) -> u32 {
        let rd = ((op >> 4) & 0x1F) as usize;
        let rr = (((op >> 5) & 0x10) | (op & 0x0F)) as usize;

        match op {
            0x0000 => return 1, // NOP
            _ => {}
        }

        // 32-bit instructions: LDS/STS/CALL/JMP
        if op & 0xFE0F == 0x9000 {
            let k = Self::fetch16(mcu, mcu.pc);
            mcu.pc = mcu.pc.wrapping_add(1);
            mcu.regs[rd] = mcu.data_read(k);
            return 2;
        }
        if op & 0xFE0F == 0x9200 {
            let k = Self::fetch16(mcu, mcu.pc);
            mcu.pc = mcu.pc.wrapping_add(1);
            mcu.data_write(k, mcu.regs[rd]);
            return 2;
        }
        if op & 0xFE0E == 0x940E {
            // CALL
            let word2 = Self::fetch16(mcu, mcu.pc);
            mcu.pc = mcu.pc.wrapping_add(1);
            let addr = (((op >> 4) & 0x1F) as u32) << 17 | ((op & 0x1) as u32) << 16 | word2 as u32;
            Self::push16(mcu, mcu.pc);
            mcu.pc = addr as u16;
            return 4;
        }
        if op & 0xFE0E == 0x940C {
            // JMP
            let word2 = Self::fetch16(mcu, mcu.pc);
            mcu.pc = mcu.pc.wrapping_add(1);
            let addr = (((op >> 4) & 0x1F) as u32) << 17 | ((op & 0x1) as u32) << 16 | word2 as u32;
            mcu.pc = addr as u16;
            return 3;
        }

        match op & 0xFC00 {
            0x0400 => {
                // CPC Rd,Rr
                let (_, carry) = Self::cp(mcu, mcu.regs[rd], mcu.regs[rr], mcu.sreg & SREG_C != 0);
                let _ = carry;
                return 1;
            }
            0x0800 => {
                // SBC Rd,Rr
                let borrow = mcu.sreg & SREG_C != 0;
                let result = Self::sub_with_borrow(mcu, mcu.regs[rd], mcu.regs[rr], borrow);
                mcu.regs[rd] = result;
                return 1;
            }
            0x0C00 => {
                // ADD Rd,Rr
                let result = Self::add(mcu, mcu.regs[rd], mcu.regs[rr], false);
                mcu.regs[rd] = result;
                return 1;
            }
            0x1000 => {
                // CPSE Rd,Rr
                let skip = mcu.regs[rd] == mcu.regs[rr];
                if skip {
                    return Self::skip_next(mcu);
                }
                return 1;
            }
            0x1400 => {
                // CP Rd,Rr
                Self::cp(mcu, mcu.regs[rd], mcu.regs[rr], false);
                return 1;
            }
            0x1800 => {
                // SUB Rd,Rr
                let result = Self::sub_with_borrow(mcu, mcu.regs[rd], mcu.regs[rr], false);
                mcu.regs[rd] = result;
                return 1;
            }
            0x1C00 => {
                // ADC Rd,Rr
                let carry = mcu.sreg & SREG_C != 0;
                let result = Self::add(mcu, mcu.regs[rd], mcu.regs[rr], carry);
                mcu.regs[rd] = result;
                return 1;
            }
            0x2000 => {
                // AND Rd,Rr
                let result = mcu.regs[rd] & mcu.regs[rr];
                Self::set_logic_flags(mcu, result);
                mcu.regs[rd] = result;
                return 1;
            }
            0x2400 => {
                // EOR Rd,Rr
                let result = mcu.regs[rd] ^ mcu.regs[rr];
                Self::set_logic_flags(mcu, result);
                mcu.regs[rd] = result;
                return 1;
            }
            0x2800 => {
                // OR Rd,Rr
                let result = mcu.regs[rd] | mcu.regs[rr];
                Self::set_logic_flags(mcu, result);
                mcu.regs[rd] = result;
                return 1;
            }
            0x2C00 => {
                // MOV Rd,Rr
                mcu.regs[rd] = mcu.regs[rr];
                return 1;
            }
            _ => {}
        }

        if op & 0xFF00 == 0x0100 {
            // MOVW: Rd/Rr are register-pair indices (*2)
            let d = (((op >> 4) & 0x0F) * 2) as usize;
            let r = ((op & 0x0F) * 2) as usize;
            mcu.regs[d] = mcu.regs[r];
            mcu.regs[d + 1] = mcu.regs[r + 1];
            return 1;
        }

        // Immediate ops, Rd in r16..r31
        let rd16 = 16 + ((op >> 4) & 0x0F) as usize;
        let imm8 = (((op >> 4) & 0xF0) | (op & 0x0F)) as u8;
        match op & 0xF000 {
            0x3000 => {
                // CPI Rd,K
                Self::cp(mcu, mcu.regs[rd16], imm8, false);
                return 1;
            }
            0x4000 => {
                // SBCI Rd,K
                let borrow = mcu.sreg & SREG_C != 0;
                mcu.regs[rd16] = Self::sub_with_borrow(mcu, mcu.regs[rd16], imm8, borrow);
                return 1;
            }
            0x5000 => {
                // SUBI Rd,K
                mcu.regs[rd16] = Self::sub_with_borrow(mcu, mcu.regs[rd16], imm8, false);
                return 1;
            }
            0x6000 => {
                // ORI Rd,K
                let result = mcu.regs[rd16] | imm8;
                Self::set_logic_flags(mcu, result);
                mcu.regs[rd16] = result;
                return 1;
            }
            0x7000 => {
                // ANDI Rd,K
                let result = mcu.regs[rd16] & imm8;
                Self::set_logic_flags(mcu, result);
                mcu.regs[rd16] = result;
                return 1;
            }
            0xE000 => {
                // LDI Rd,K
                mcu.regs[rd16] = imm8;
                return 1;
            }
            _ => {}
        }

        // Single-operand register ops: 1001 010d dddd xxxx
        if op & 0xFE00 == 0x9400 {
            match op & 0x000F {
                0x0 => {
                    mcu.regs[rd] = !mcu.regs[rd];
                    let r = mcu.regs[rd];
                    Self::set_logic_flags(mcu, r);
                    mcu.sreg |= SREG_C;
                    return 1;
                }
                0x1 => {
                    // NEG
                    let v = mcu.regs[rd];
                    let result = Self::sub_with_borrow(mcu, 0, v, false);
                    mcu.regs[rd] = result;
                    return 1;
                }
                0x2 => {
                    // SWAP
                    let v = mcu.regs[rd];
                    mcu.regs[rd] = (v << 4) | (v >> 4);
                    return 1;
                }
                0x3 => {
                    // INC
                    let v = mcu.regs[rd];
                    let result = v.wrapping_add(1);
                    mcu.regs[rd] = result;
                    Self::set_zn(mcu, result);
                    if result == 0x80 {
                        mcu.sreg |= SREG_V;
                    } else {
                        mcu.sreg &= !SREG_V;
                    }
                    Self::sync_s(mcu);
                    return 1;
                }
                0x5 => {
                    // ASR
                    let v = mcu.regs[rd];
                    let result = ((v as i8) >> 1) as u8;
                    if v & 1 != 0 {
                        mcu.sreg |= SREG_C;
                    } else {
                        mcu.sreg &= !SREG_C;
                    }
                    mcu.regs[rd] = result;
                    Self::set_zn(mcu, result);
                    Self::sync_s(mcu);
                    return 1;
                }
                0x6 => {
                    // LSR
                    let v = mcu.regs[rd];
                    let result = v >> 1;
                    if v & 1 != 0 {
                        mcu.sreg |= SREG_C;
                    } else {
                        mcu.sreg &= !SREG_C;
                    }
                    mcu.sreg &= !SREG_N;
                    mcu.regs[rd] = result;
                    if result == 0 {
                        mcu.sreg |= SREG_Z;
                    } else {
                        mcu.sreg &= !SREG_Z;
                    }
                    Self::sync_s(mcu);
                    return 1;
                }
                0x7 => {
                    // ROR
                    let v = mcu.regs[rd];
                    let carry_in = if mcu.sreg & SREG_C != 0 { 0x80 } else { 0 };
                    let result = (v >> 1) | carry_in;
                    if v & 1 != 0 {
                        mcu.sreg |= SREG_C;
                    } else {
                        mcu.sreg &= !SREG_C;
                    }
                    mcu.regs[rd] = result;
                    Self::set_zn(mcu, result);
                    Self::sync_s(mcu);
                    return 1;
                }
                0xA => {
                    // DEC
                    let v = mcu.regs[rd];
                    let result = v.wrapping_sub(1);
                    mcu.regs[rd] = result;
                    Self::set_zn(mcu, result);
                    if result == 0x7F {
                        mcu.sreg |= SREG_V;
                    } else {
                        mcu.sreg &= !SREG_V;
                    }
                    Self::sync_s(mcu);
                    return 1;
                }
                _ => {}
            }
        }

        // RET/RETI/SEI/CLI/BSET/BCLR/SLEEP/WDR/BREAK/LPM(R0): 1001 0101 xxxx 1000 and 1001 0101 110x 1000
        if op == 0x9508 {
            mcu.pc = Self::pop16(mcu);
            return 4;
        }
        if op == 0x9518 {
            mcu.pc = Self::pop16(mcu);
            mcu.sreg |= SREG_I;
            return 4;
        }
        if op & 0xFF0F == 0x9408 {
            // BSET/BCLR: 1001 0100 Xsss 1000
            let s = ((op >> 4) & 0x07) as u8;
            let set = op & 0x0080 == 0;
            if set {
                mcu.sreg |= 1 << s;
            } else {
                mcu.sreg &= !(1 << s);
            }
            return 1;
        }
        if op == 0x95A8 {
            return 1; // WDR (not modeled beyond acknowledging the instruction)
        }
        if op == 0x9588 || op == 0x9598 {
            return 1; // SLEEP / BREAK, decoded as NOP: power/debug modes aren't modeled
        }
        if op == 0x95C8 {
            // LPM (implicit R0 <- (Z))
            let z = Self::reg_pair(mcu, 30);
            mcu.regs[0] = mcu.flash.get(z as usize).copied().unwrap_or(0);
            return 3;
        }

        // ADIW/SBIW: 1001 011q qqdd qqqq
        if op & 0xFF00 == 0x9600 || op & 0xFF00 == 0x9700 {
            let pair_sel = ((op >> 4) & 0x03) as usize;
            let base = 24 + pair_sel * 2;
            let k = (((op >> 2) & 0x30) | (op & 0x0F)) as u16;
            let value = Self::reg_pair(mcu, base);
            let result = if op & 0xFF00 == 0x9600 {
                value.wrapping_add(k)
            } else {
                value.wrapping_sub(k)
            };
            Self::set_reg_pair(mcu, base, result);
            mcu.sreg &= !(SREG_Z | SREG_N | SREG_V | SREG_C | SREG_S);
            if result == 0 {
                mcu.sreg |= SREG_Z;
            }
            if result & 0x8000 != 0 {
                mcu.sreg |= SREG_N;
            }
            if op & 0xFF00 == 0x9600 {
                if value & 0x8000 == 0 && result & 0x8000 != 0 {
                    mcu.sreg |= SREG_V;
                }
                if result < value {
                    mcu.sreg |= SREG_C;
                }
            } else {
                if value & 0x8000 != 0 && result & 0x8000 == 0 {
                    mcu.sreg |= SREG_V;
                }
                if result > value {
                    mcu.sreg |= SREG_C;
                }
            }
            Self::sync_s(mcu);
            return 2;
        }

        // IN/OUT
        if op & 0xF800 == 0xB000 {
            let a = (((op >> 5) & 0x30) | (op & 0x0F)) as u16;
            mcu.regs[rd] = mcu.data_read(32 + a);
            return 1;
        }
        if op & 0xF800 == 0xB800 {
            let a = (((op >> 5) & 0x30) | (op & 0x0F)) as u16;
            mcu.data_write(32 + a, mcu.regs[rd]);
            return 1;
        }

        // SBI/CBI/SBIC/SBIS: 1001 10xx AAAA Abbb
        if op & 0xFF00 == 0x9A00 || op & 0xFF00 == 0x9800 || op & 0xFF00 == 0x9900 || op & 0xFF00 == 0x9B00 {
            let a = ((op >> 3) & 0x1F) as u16;
            let b = (op & 0x07) as u8;
            let addr = 32 + a;
            match op & 0xFF00 {
                0x9A00 => {
                    let v = mcu.data_read(addr) | (1 << b);
                    mcu.data_write(addr, v);
                    return 2;
                }
                0x9800 => {
                    let v = mcu.data_read(addr) & !(1 << b);
                    mcu.data_write(addr, v);
                    return 2;
                }
                0x9900 => {
                    if mcu.data_read(addr) & (1 << b) == 0 {
                        return Self::skip_next(mcu);
                    }
                    return 1;
                }
                0x9B00 => {
                    if mcu.data_read(addr) & (1 << b) != 0 {
                        return Self::skip_next(mcu);
                    }
                    return 1;
                }
                _ => unreachable!(),
            }
        }

        // PUSH/POP
        if op & 0xFE0F == 0x920F {
            Self::push8(mcu, mcu.regs[rd]);
            return 2;
        }
        if op & 0xFE0F == 0x900F {
            mcu.regs[rd] = Self::pop8(mcu);
            return 2;
        }

        // RJMP/RCALL
        if op & 0xF000 == 0xC000 {
            let k = sign_extend12(op & 0x0FFF);
            mcu.pc = (mcu.pc as i32 + k as i32) as u16;
            return 2;
        }
        if op & 0xF000 == 0xD000 {
            let k = sign_extend12(op & 0x0FFF);
            Self::push16(mcu, mcu.pc);
            mcu.pc = (mcu.pc as i32 + k as i32) as u16;
            return 3;
        }

        // BRBS/BRBC: 1111 0o kkkkkkk sss
        if op & 0xF800 == 0xF000 || op & 0xF800 == 0xF400 {
            let branch_if_set = op & 0xFC00 == 0xF000;
            let s = (op & 0x07) as u8;
            let k = sign_extend7(((op >> 3) & 0x7F) as u16);
            let flag_set = mcu.sreg & (1 << s) != 0;
            let take = flag_set == branch_if_set;
            if take {
                mcu.pc = (mcu.pc as i32 + k as i32) as u16;
                return 2;
            }
            return 1;
        }

        // LD/ST via X/Y/Z with post-inc/pre-dec, LDD/STD with displacement
        if let Some(cycles) = Self::exec_indirect(mcu, op, rd) {
            return cycles;
        }

        // Unknown opcode: downgrade to a 1-cycle NOP rather than fault.
        log::debug!("unknown AVR opcode 0x{:04X} at pc=0x{:04X}", op, mcu.pc.wrapping_sub(1));
        1
    }

    fn exec_indirect(mcu: &mut McuState, op: u16, rd: usize) -> Option<u32> {
        // LD Rd, Z / Y (no displacement, no pointer change): 100o 00Rd dddd ooo0 where base bit10 selects Y(1)/Z(0)
        let base_lo = op & 0x000F;
        let high = op & 0xFE00;

        // LDD/STD with displacement q: 10q0 qq0d dddd 1qqq (Y) / 10q0 qq0d dddd 0qqq (Z) for loads
        // and 10q0 qq1r rrrr 1qqq / 0qqq for stores.
        if op & 0xD000 == 0x8000 {
            let q = (((op >> 8) & 0x20) | ((op >> 7) & 0x18) | (op & 0x07)) as u16;
            let is_store = op & 0x0200 != 0;
            let use_y = op & 0x0008 != 0;
            let base = if use_y { 28 } else { 30 };
            let ptr = Self::reg_pair(mcu, base).wrapping_add(q);
            if is_store {
                mcu.data_write(ptr, mcu.regs[rd]);
            } else {
                mcu.regs[rd] = mcu.data_read(ptr);
            }
            return Some(2);
        }

        if high == 0x9000 || high == 0x9200 {
            let is_store = high == 0x9200;
            let (base, postinc, predec) = match base_lo {
                0xC => (26, false, false), // X
                0xD => (26, true, false),  // X+
                0xE => (26, false, true),  // -X
                0x9 => (28, true, false),  // Y+
                0xA => (28, false, true),  // -Y
                0x1 => (30, true, false),  // Z+
                0x2 => (30, false, true),  // -Z
                _ => return None,
            };
            let mut ptr = Self::reg_pair(mcu, base);
            if predec {
                ptr = ptr.wrapping_sub(1);
                Self::set_reg_pair(mcu, base, ptr);
            }
            if is_store {
                mcu.data_write(ptr, mcu.regs[rd]);
            } else {
                mcu.regs[rd] = mcu.data_read(ptr);
            }
            if postinc {
                Self::set_reg_pair(mcu, base, ptr.wrapping_add(1));
            }
            return Some(2);
        }

        // LPM Rd, Z / Z+
        if high == 0x9000 && (base_lo == 0x4 || base_lo == 0x5) {
            let z = Self::reg_pair(mcu, 30);
            mcu.regs[rd] = mcu.flash.get(z as usize).copied().unwrap_or(0);
            if base_lo == 0x5 {
                Self::set_reg_pair(mcu, 30, z.wrapping_add(1));
            }
            return Some(3);
        }

        None
    }

    fn skip_next(mcu: &mut McuState) -> u32 {
        let next = Self::fetch16(mcu, mcu.pc);
        let is32 = next & 0xFE0F == 0x9000
            || next & 0xFE0F == 0x9200
            || next & 0xFE0E == 0x940E
            || next & 0xFE0E == 0x940C;
        mcu.pc = mcu.pc.wrapping_add(if is32 { 2 } else { 1 });
        if is32 {
            3
        } else {
            2
        }
    }

    fn reg_pair(mcu: &McuState, base: usize) -> u16 {
        mcu.regs[base] as u16 | ((mcu.regs[base + 1] as u16) << 8)
    }

    fn set_reg_pair(mcu: &mut McuState, base: usize, value: u16) {
        mcu.regs[base] = (value & 0xFF) as u8;
        mcu.regs[base + 1] = (value >> 8) as u8;
    }

    fn set_zn(mcu: &mut McuState, result: u8) {
        if result == 0 {
            mcu.sreg |= SREG_Z;
        } else {
            mcu.sreg &= !SREG_Z;
        }
        if result & 0x80 != 0 {
            mcu.sreg |= SREG_N;
        } else {
            mcu.sreg &= !SREG_N;
        }
    }

    fn sync_s(mcu: &mut McuState) {
        let n = mcu.sreg & SREG_N != 0;
        let v = mcu.sreg & SREG_V != 0;
        if n ^ v {
            mcu.sreg |= SREG_S;
        } else {
            mcu.sreg &= !SREG_S;
        }
    }

    fn set_logic_flags(mcu: &mut McuState, result: u8) {
        Self::set_zn(mcu, result);
        mcu.sreg &= !SREG_V;
        Self::sync_s(mcu);
    }

    fn add(mcu: &mut McuState, a: u8, b: u8, carry_in: bool) -> u8 {
        let c = carry_in as u16;
        let sum = a as u16 + b as u16 + c;
        let result = sum as u8;
        mcu.sreg &= !(SREG_C | SREG_Z | SREG_N | SREG_V | SREG_H);
        if sum & 0x100 != 0 {
            mcu.sreg |= SREG_C;
        }
        if (a & 0x0F) + (b & 0x0F) + c as u8 > 0x0F {
            mcu.sreg |= SREG_H;
        }
        if ((a ^ result) & (b ^ result) & 0x80) != 0 {
            mcu.sreg |= SREG_V;
        }
        Self::set_zn(mcu, result);
        Self::sync_s(mcu);
        result
    }

    fn sub_with_borrow(mcu: &mut McuState, a: u8, b: u8, borrow_in: bool) -> u8 {
        let bw = borrow_in as i16;
        let diff = a as i16 - b as i16 - bw;
        let result = diff as u8;
        mcu.sreg &= !(SREG_C | SREG_Z | SREG_N | SREG_V | SREG_H);
        if diff < 0 {
            mcu.sreg |= SREG_C;
        }
        if (((!a) & b) | (b & result) | (result & (!a))) & 0x08 != 0 {
            mcu.sreg |= SREG_H;
        }
        if ((a ^ b) & (a ^ result) & 0x80) != 0 {
            mcu.sreg |= SREG_V;
        }
        Self::set_zn(mcu, result);
        Self::sync_s(mcu);
        result
    }

    fn cp(mcu: &mut McuState, a: u8, b: u8, borrow_in: bool) -> (u8, bool) {
        let before = mcu.sreg;
        let result = Self::sub_with_borrow(mcu, a, b, borrow_in);
        let _ = before;
        (result, mcu.sreg & SREG_C != 0)
    }
}

fn sign_extend12(k: u16) -> i16 {
    if k & 0x0800 != 0 {
        (k | 0xF000) as i16
    } else {
        k as i16
    }
}

fn sign_extend7(k: u16) -> i16 {
    if k & 0x40 != 0 {
        (k | 0xFF80) as i16
    } else {
        k as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;
    use crate::mcu::McuState;

    fn asm(mcu: &mut McuState, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            mcu.flash[i * 2] = (*w & 0xFF) as u8;
            mcu.flash[i * 2 + 1] = (*w >> 8) as u8;
        }
    }

    #[test]
    fn ldi_out_sbi_cbi_roundtrip() {
        let mut mcu = McuState::new(&UNO);
        // LDI r16, 0xFF ; OUT DDRB, r16 (set all of PORTB as output)
        let ddrb_a = (io::DDRB - 0x20) as u16;
        asm(&mut mcu, &[
            0xE0FF,                                  // LDI r16, 0xFF
            0xB800 | ((ddrb_a & 0x30) << 5) | (ddrb_a & 0x0F) | (16 << 4),
        ]);
        Cpu::step(&mut mcu);
        assert_eq!(mcu.regs[16], 0xFF);
        Cpu::step(&mut mcu);
        assert_eq!(mcu.io[io::DDRB], 0xFF);
    }

    #[test]
    fn rjmp_moves_pc_by_signed_offset() {
        let mut mcu = McuState::new(&UNO);
        asm(&mut mcu, &[0xC002]); // RJMP +2
        Cpu::step(&mut mcu);
        assert_eq!(mcu.pc, 1 + 2);
    }

    #[test]
    fn dec_sets_zero_flag_at_one_to_zero() {
        let mut mcu = McuState::new(&UNO);
        mcu.regs[17] = 1;
        // DEC r17: 1001 010d dddd 1010
        let op = 0x940A | ((17u16) << 4);
        asm(&mut mcu, &[op]);
        Cpu::step(&mut mcu);
        assert_eq!(mcu.regs[17], 0);
        assert_eq!(mcu.sreg & SREG_Z, SREG_Z);
    }

    #[test]
    fn cli_clears_global_interrupt_flag() {
        let mut mcu = McuState::new(&UNO);
        mcu.sreg |= SREG_I;
        asm(&mut mcu, &[0x94F8]); // CLI: BCLR s=7
        Cpu::step(&mut mcu);
        assert_eq!(mcu.sreg & SREG_I, 0);
    }

    #[test]
    fn sei_still_sets_global_interrupt_flag() {
        let mut mcu = McuState::new(&UNO);
        mcu.sreg &= !SREG_I;
        asm(&mut mcu, &[0x9478]); // SEI: BSET s=7
        Cpu::step(&mut mcu);
        assert_eq!(mcu.sreg & SREG_I, SREG_I);
    }

    #[test]
    fn sign_extend7_matches_word_relative_branch_encoding() {
        assert_eq!(sign_extend7(0), 0);
        assert_eq!(sign_extend7(1), 1);
        assert_eq!(sign_extend7(0x7F), -1);
        assert_eq!(sign_extend7(0x7E), -2);
    }

    #[test]
    fn breq_branches_forward_by_exact_word_count_when_zero_flag_set() {
        let mut mcu = McuState::new(&UNO);
        mcu.sreg |= SREG_Z;
        asm(&mut mcu, &[0xF000 | (5 << 3) | 1]); // BREQ +5
        Cpu::step(&mut mcu);
        assert_eq!(mcu.pc, 1 + 5);
    }

    #[test]
    fn breq_branches_backward_by_exact_word_count_when_zero_flag_set() {
        let mut mcu = McuState::new(&UNO);
        mcu.pc = 10;
        mcu.sreg |= SREG_Z;
        let op = 0xF000 | (0x7F << 3) | 1; // BREQ -1
        mcu.flash[20] = (op & 0xFF) as u8;
        mcu.flash[21] = (op >> 8) as u8;
        Cpu::step(&mut mcu);
        assert_eq!(mcu.pc, 10);
    }

    #[test]
    fn push_pop_roundtrip() {
        let mut mcu = McuState::new(&UNO);
        mcu.regs[5] = 0x42;
        let sp_before = mcu.sp();
        let push_op = 0x920F | (5u16 << 4);
        let pop_op = 0x900F | (6u16 << 4);
        asm(&mut mcu, &[push_op, pop_op]);
        Cpu::step(&mut mcu);
        assert_eq!(mcu.sp(), sp_before - 1);
        Cpu::step(&mut mcu);
        assert_eq!(mcu.regs[6], 0x42);
        assert_eq!(mcu.sp(), sp_before);
    }
}
