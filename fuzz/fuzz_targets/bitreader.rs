#![no_main]

use bitstream::BitReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = BitReader::new(data);
    let mut idx = 0usize;

    while idx < data.len() && idx < 1024 {
        let op = data[idx];
        idx += 1;

        match op % 8 {
            0 => {
                let _ = reader.read_bool();
            }
            1 => {
                let _ = reader.read_bits((op >> 3) % 65);
            }
            2 => {
                let _ = reader.align_to_byte();
            }
            3 => {
                let _ = reader.read_varu64();
            }
            4 => {
                let _ = reader.read_varu32();
            }
            5 => {
                let _ = reader.read_vars32();
            }
            6 => {
                let _ = reader.read_f32();
            }
            _ => {
                let _ = reader.read_bytes(usize::from(op >> 3));
            }
        }
        assert!(reader.bit_position() <= data.len() * 8);
    }
});
