// Feetech STS-series serial protocol
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// The bus is generic over its transport so it can run against a serial
// port or an in-memory buffer.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// ID every servo listens on; never answers
pub const BROADCAST_ID: u8 = 0xFE;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Control table addresses used by the drive
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte: 0=off, 1=on
    GoalVelocity = 46,    // 2 bytes, sign-magnitude
    PresentVelocity = 58, // 2 bytes, read-only, sign-magnitude
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Checksum over everything after the header
fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

fn packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + params.len());
    out.extend_from_slice(&HEADER);
    out.push(id);
    out.push((params.len() + 2) as u8); // instruction + params + checksum
    out.push(instruction as u8);
    out.extend_from_slice(params);
    out.push(checksum(&out[2..]));
    out
}

/// Signed velocity to bit-15 sign / 15-bit magnitude
pub fn encode_velocity(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

pub fn decode_velocity(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

pub struct FeetechBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }
}

impl<P: Read + Write> FeetechBus<P> {
    pub fn with_transport(port: P) -> Self {
        Self { port }
    }

    pub fn transport(&self) -> &P {
        &self.port
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::UnexpectedEof => FeetechError::Timeout { id },
            _ => FeetechError::Io(e),
        })
    }

    /// Read one status packet and return its parameters
    fn status(&mut self, id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.read_exact(&mut head, id)?;
        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }
        if head[2] != id {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("ID mismatch: expected {}, got {}", id, head[2]),
            });
        }
        let length = head[3] as usize;
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status byte + params + checksum
        let mut body = vec![0u8; length];
        self.read_exact(&mut body, id)?;
        let (payload, sum) = body.split_at(length - 1);

        let mut covered = vec![head[2], head[3]];
        covered.extend_from_slice(payload);
        if checksum(&covered) != sum[0] {
            return Err(FeetechError::ChecksumMismatch { id });
        }
        if payload[0] != 0 {
            return Err(FeetechError::MotorError {
                id,
                status: payload[0],
            });
        }
        Ok(payload[1..].to_vec())
    }

    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.send(&packet(id, Instruction::Ping, &[]))?;
        match self.status(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to motor {}: reg={:?}, value={}", id, register, value);
        self.send(&packet(id, Instruction::Write, &[register as u8, value]))?;
        self.status(id).map(|_| ())
    }

    fn read_bytes(&mut self, id: u8, register: Register, count: u8) -> Result<Vec<u8>> {
        self.send(&packet(id, Instruction::Read, &[register as u8, count]))?;
        let data = self.status(id)?;
        if data.len() < count as usize {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", count, data.len()),
            });
        }
        Ok(data)
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        Ok(self.read_bytes(id, register, 1)?[0])
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let data = self.read_bytes(id, register, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    /// One broadcast packet writing `register` on every listed motor
    ///
    /// Every entry must carry the same number of bytes. Servos apply it on
    /// receipt and send no reply.
    pub fn sync_write(&mut self, register: Register, entries: &[(u8, &[u8])]) -> Result<()> {
        let Some(&(_, first)) = entries.first() else {
            return Ok(());
        };
        let width = first.len();
        if let Some(&(id, bad)) = entries.iter().find(|(_, data)| data.len() != width) {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("sync write expects {} bytes per motor, got {}", width, bad.len()),
            });
        }

        let mut params = vec![register as u8, width as u8];
        for &(id, data) in entries {
            params.push(id);
            params.extend_from_slice(data);
        }
        debug!("Sync write to {} motors: reg={:?}", entries.len(), register);
        self.send(&packet(BROADCAST_ID, Instruction::SyncWrite, &params))
    }

    pub fn sync_write_velocity(&mut self, data: &[(u8, i16)]) -> Result<()> {
        let encoded: Vec<(u8, [u8; 2])> = data
            .iter()
            .map(|&(id, v)| (id, encode_velocity(v).to_le_bytes()))
            .collect();
        let entries: Vec<(u8, &[u8])> = encoded.iter().map(|(id, b)| (*id, &b[..])).collect();
        self.sync_write(Register::GoalVelocity, &entries)
    }

    pub fn sync_write_torque(&mut self, data: &[(u8, bool)]) -> Result<()> {
        let encoded: Vec<(u8, [u8; 1])> = data.iter().map(|&(id, on)| (id, [on as u8])).collect();
        let entries: Vec<(u8, &[u8])> = encoded.iter().map(|(id, b)| (*id, &b[..])).collect();
        self.sync_write(Register::TorqueEnable, &entries)
    }

    pub fn set_torque(&mut self, id: u8, on: bool) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, on as u8)
    }

    /// Torque must be off while switching modes
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    pub fn get_velocity(&mut self, id: u8) -> Result<i16> {
        Ok(decode_velocity(self.read_u16(id, Register::PresentVelocity)?))
    }
}
