/// Lookup table for polynomial 0x1021, MSB first.
static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 0x8000 != 0 {
                (value << 1) ^ 0x1021
            } else {
                value << 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Transfer CRC used by multi-frame UAVCAN v0 transfers.
///
/// ```ignore
/// |Check |Poly  |Init  |Ref  |XorOut|
/// |---   |---   |---   |---  |---   |
/// |0x29B1|0x1021|0xFFFF|false|0x0000|
/// ```
/// Same parameters as crc_any's `crc16ccitt_false`.
#[derive(Clone, Debug)]
pub struct Crc16(u16);

impl Crc16 {
    /// Initializes the crc as 0xFFFF.
    pub fn init() -> Self {
        Self(0xFFFF)
    }

    /// Initializes the crc and feeds it the data type signature, least
    /// significant byte first, as every v0 transfer CRC starts that way.
    pub fn from_signature(data_type_signature: u64) -> Self {
        let mut crc = Self::init();
        crc.digest(&data_type_signature.to_le_bytes());
        crc
    }

    /// Process the current crc sum further with the supplied data.
    pub fn digest<T: ?Sized + AsRef<[u8]>>(&mut self, data: &T) {
        for n in data.as_ref().iter().copied() {
            let index = ((self.0 >> 8) as u8 ^ n) as usize;
            self.0 = (self.0 << 8) ^ TABLE[index];
        }
    }

    /// Retrieve the current crc sum.
    pub fn get_crc(&self) -> u16 {
        self.0
    }
}
