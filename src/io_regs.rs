//! Data-space addresses of IO registers.
//!
//! Addresses below 0x100 are shared by both families (they mirror the real
//! ATmega328P register file closely enough to be recognizable). Addresses
//! from 0x120 up are 2560-only: extra ports, timers 3-5, USART1-3. Because
//! `BoardProfile::sram_start` is `0x20 + io_bytes` rather than a fixed
//! silicon constant, both ranges comfortably fit beneath each family's SRAM
//! boundary (0x120 for the 328P-class profiles, 0x220 for the Mega).

pub const PINB: usize = 0x23;
pub const DDRB: usize = 0x24;
pub const PORTB: usize = 0x25;
pub const PINC: usize = 0x26;
pub const DDRC: usize = 0x27;
pub const PORTC: usize = 0x28;
pub const PIND: usize = 0x29;
pub const DDRD: usize = 0x2A;
pub const PORTD: usize = 0x2B;

pub const TIFR0: usize = 0x35;
pub const TIFR1: usize = 0x36;
pub const TIFR2: usize = 0x37;
pub const TIFR3: usize = 0x38;
pub const TIFR4: usize = 0x39;
pub const TIFR5: usize = 0x3A;

pub const PCIFR: usize = 0x3B;
pub const EIFR: usize = 0x3C;
pub const EIMSK: usize = 0x3D;
pub const GPIOR0: usize = 0x3E;

pub const EECR: usize = 0x3F;
pub const EEDR: usize = 0x40;
pub const EEARL: usize = 0x41;
pub const EEARH: usize = 0x42;

pub const GTCCR: usize = 0x43;
pub const TCCR0A: usize = 0x44;
pub const TCCR0B: usize = 0x45;
pub const TCNT0: usize = 0x46;
pub const OCR0A: usize = 0x47;
pub const OCR0B: usize = 0x48;

pub const GPIOR1: usize = 0x4A;
pub const GPIOR2: usize = 0x4B;
pub const SPCR: usize = 0x4C;
pub const SPSR: usize = 0x4D;
pub const SPDR: usize = 0x4E;

pub const ACSR: usize = 0x50;
pub const SMCR: usize = 0x53;
pub const MCUSR: usize = 0x54;
pub const MCUCR: usize = 0x55;
pub const SPMCSR: usize = 0x57;

pub const SPL: usize = 0x5D;
pub const SPH: usize = 0x5E;
pub const SREG: usize = 0x5F;

pub const WDTCSR: usize = 0x60;
pub const CLKPR: usize = 0x61;
pub const PRR: usize = 0x64;
pub const OSCCAL: usize = 0x66;
pub const PCICR: usize = 0x68;
pub const EICRA: usize = 0x69;
pub const EICRB: usize = 0x6A;
pub const PCMSK0: usize = 0x6B;
pub const PCMSK1: usize = 0x6C;
pub const PCMSK2: usize = 0x6D;
pub const TIMSK0: usize = 0x6E;
pub const TIMSK1: usize = 0x6F;
pub const TIMSK2: usize = 0x70;
pub const TIMSK3: usize = 0x71;
pub const TIMSK4: usize = 0x72;
pub const TIMSK5: usize = 0x73;

pub const ADCL: usize = 0x78;
pub const ADCH: usize = 0x79;
pub const ADCSRA: usize = 0x7A;
pub const ADCSRB: usize = 0x7B;
pub const ADMUX: usize = 0x7C;
pub const DIDR0: usize = 0x7E;
pub const DIDR1: usize = 0x7F;

pub const TCCR1A: usize = 0x80;
pub const TCCR1B: usize = 0x81;
pub const TCCR1C: usize = 0x82;
pub const TCNT1L: usize = 0x84;
pub const TCNT1H: usize = 0x85;
pub const ICR1L: usize = 0x86;
pub const ICR1H: usize = 0x87;
pub const OCR1AL: usize = 0x88;
pub const OCR1AH: usize = 0x89;
pub const OCR1BL: usize = 0x8A;
pub const OCR1BH: usize = 0x8B;

pub const TCCR3A: usize = 0x90;
pub const TCCR3B: usize = 0x91;
pub const TCCR3C: usize = 0x92;
pub const TCNT3L: usize = 0x94;
pub const TCNT3H: usize = 0x95;
pub const ICR3L: usize = 0x96;
pub const ICR3H: usize = 0x97;
pub const OCR3AL: usize = 0x98;
pub const OCR3AH: usize = 0x99;
pub const OCR3BL: usize = 0x9A;
pub const OCR3BH: usize = 0x9B;
pub const OCR3CL: usize = 0x9C;
pub const OCR3CH: usize = 0x9D;

pub const TCCR4A: usize = 0xA0;
pub const TCCR4B: usize = 0xA1;
pub const TCCR4C: usize = 0xA2;
pub const TCNT4L: usize = 0xA4;
pub const TCNT4H: usize = 0xA5;
pub const ICR4L: usize = 0xA6;
pub const ICR4H: usize = 0xA7;
pub const OCR4AL: usize = 0xA8;
pub const OCR4AH: usize = 0xA9;
pub const OCR4BL: usize = 0xAA;
pub const OCR4BH: usize = 0xAB;
pub const OCR4CL: usize = 0xAC;
pub const OCR4CH: usize = 0xAD;

pub const TCCR2A: usize = 0xB0;
pub const TCCR2B: usize = 0xB1;
pub const TCNT2: usize = 0xB2;
pub const OCR2A: usize = 0xB3;
pub const OCR2B: usize = 0xB4;

pub const TWBR: usize = 0xB8;
pub const TWSR: usize = 0xB9;
pub const TWAR: usize = 0xBA;
pub const TWDR: usize = 0xBB;
pub const TWCR: usize = 0xBC;
pub const TWAMR: usize = 0xBD;

pub const UCSR0A: usize = 0xC0;
pub const UCSR0B: usize = 0xC1;
pub const UCSR0C: usize = 0xC2;
pub const UBRR0L: usize = 0xC4;
pub const UBRR0H: usize = 0xC5;
pub const UDR0: usize = 0xC6;

pub const UCSR1A: usize = 0xC8;
pub const UCSR1B: usize = 0xC9;
pub const UCSR1C: usize = 0xCA;
pub const UBRR1L: usize = 0xCC;
pub const UBRR1H: usize = 0xCD;
pub const UDR1: usize = 0xCE;

pub const UCSR2A: usize = 0xD0;
pub const UCSR2B: usize = 0xD1;
pub const UCSR2C: usize = 0xD2;
pub const UBRR2L: usize = 0xD4;
pub const UBRR2H: usize = 0xD5;
pub const UDR2: usize = 0xD6;

pub const UCSR3A: usize = 0xD8;
pub const UCSR3B: usize = 0xD9;
pub const UCSR3C: usize = 0xDA;
pub const UBRR3L: usize = 0xDC;
pub const UBRR3H: usize = 0xDD;
pub const UDR3: usize = 0xDE;

// --- 2560-only extended register block (ports A, E-L, timer 5) ---

pub const PINA: usize = 0x120;
pub const DDRA: usize = 0x121;
pub const PORTA: usize = 0x122;

pub const PINE: usize = 0x123;
pub const DDRE: usize = 0x124;
pub const PORTE: usize = 0x125;

pub const PINF: usize = 0x126;
pub const DDRF: usize = 0x127;
pub const PORTF: usize = 0x128;

pub const PING: usize = 0x129;
pub const DDRG: usize = 0x12A;
pub const PORTG: usize = 0x12B;

pub const PINH: usize = 0x12C;
pub const DDRH: usize = 0x12D;
pub const PORTH: usize = 0x12E;

pub const PINJ: usize = 0x12F;
pub const DDRJ: usize = 0x130;
pub const PORTJ: usize = 0x131;

pub const PINK: usize = 0x132;
pub const DDRK: usize = 0x133;
pub const PORTK: usize = 0x134;

pub const PINL: usize = 0x135;
pub const DDRL: usize = 0x136;
pub const PORTL: usize = 0x137;

pub const TCCR5A: usize = 0x140;
pub const TCCR5B: usize = 0x141;
pub const TCCR5C: usize = 0x142;
pub const TCNT5L: usize = 0x144;
pub const TCNT5H: usize = 0x145;
pub const ICR5L: usize = 0x146;
pub const ICR5H: usize = 0x147;
pub const OCR5AL: usize = 0x148;
pub const OCR5AH: usize = 0x149;
pub const OCR5BL: usize = 0x14A;
pub const OCR5BH: usize = 0x14B;
pub const OCR5CL: usize = 0x14C;
pub const OCR5CH: usize = 0x14D;
