//! Linux magnetic tape driver ioctl definitions
//!
//! Subset of /usr/include/x86_64-linux-gnu/sys/mtio.h used by the
//! st-based device backend. See also: man 4 st

#[repr(C)]
pub struct mtop {
    pub mt_op: MTCmd,
    pub mt_count: libc::c_int,
}

#[repr(i16)]
#[allow(dead_code)] // command set kept complete, not all are issued
pub enum MTCmd {
    /// forward space over filemark, position at first record of next file
    MTFSF = 1,
    /// backward space filemark (position on BOT side of it)
    MTBSF = 2,
    /// write end-of-file marks
    MTWEOF = 5,
    /// rewind
    MTREW = 6,
    /// rewind and put the drive offline (eject)
    MTOFFL = 7,
    /// no op, flushes the driver buffer, set status only
    MTNOP = 8,
    /// goto end of recorded media (ready for appending files)
    MTEOM = 12,
    /// erase tape from the current position
    MTERASE = 13,
    /// set block length
    MTSETBLK = 20,
    /// seek to logical block (SCSI-2 LOCATE)
    MTSEEK = 22,
    /// tell logical block (SCSI-2 READ POSITION)
    MTTELL = 23,
    /// set the drive buffering according to SCSI-2
    MTSETDRVBUFFER = 24,
    /// space forward over setmarks
    MTFSS = 25,
    /// space backward over setmarks
    MTBSS = 26,
    /// write setmarks
    MTWSM = 27,
    /// execute the SCSI load command
    MTLOAD = 30,
    /// execute the SCSI unload command
    MTUNLOAD = 31,
    /// control compression with SCSI mode page 15
    MTCOMPRESSION = 32,
    /// change the active tape partition
    MTSETPART = 33,
    /// format the tape with one or two partitions
    MTMKPART = 34,
}

//#define MTIOCTOP _IOW('m', 1, struct mtop)
nix::ioctl_write_ptr!(mtioctop, b'm', 1, mtop);

#[derive(Default, Debug)]
#[repr(C)]
pub struct mtget {
    pub mt_type: libc::c_long,
    pub mt_resid: libc::c_long,
    /// device dependent status register
    pub mt_dsreg: libc::c_long,
    /// device independent status
    pub mt_gstat: libc::c_long,
    pub mt_erreg: libc::c_long,
    pub mt_fileno: i32,
    pub mt_blkno: i32,
}

//#define MTIOCGET _IOR('m', 2, struct mtget)
nix::ioctl_read!(mtiocget, b'm', 2, mtget);

#[repr(C)]
pub struct mtpos {
    pub mt_blkno: libc::c_long,
}

//#define MTIOCPOS _IOR('m', 3, struct mtpos)
nix::ioctl_read!(mtiocpos, b'm', 3, mtpos);

pub const MT_ST_BLKSIZE_MASK: libc::c_long = 0x0ffffff;
pub const MT_ST_BLKSIZE_SHIFT: usize = 0;

/// Generic ANSI SCSI-1 / SCSI-2 tape unit types in `mt_type`
pub const MT_TYPE_ISSCSI1: libc::c_long = 0x71;
pub const MT_TYPE_ISSCSI2: libc::c_long = 0x72;

bitflags::bitflags! {
    /// Device independent status bits from `mt_gstat`
    pub struct GMTStatusFlags: libc::c_long {
        const EOF = 0x80000000;
        const BOT = 0x40000000;
        const EOT = 0x20000000;
        /// DDS setmark under the head
        const SM  = 0x10000000;
        /// DDS end-of-data
        const EOD = 0x08000000;
        const WR_PROT = 0x04000000;
        const ONLINE = 0x01000000;
        /// door open, no tape
        const DRIVE_OPEN = 0x00040000;
        const IM_REP_EN = 0x00010000;
    }
}

/// `mt_count` command selector for MTSETDRVBUFFER
#[repr(i32)]
#[allow(non_camel_case_types, dead_code)]
pub enum SetDrvBufferCmd {
    MT_ST_BOOLEANS = 0x10000000,
    MT_ST_SETBOOLEANS = 0x30000000,
    MT_ST_CLEARBOOLEANS = 0x40000000,
}

bitflags::bitflags! {
    /// Boolean driver options for MTSETDRVBUFFER
    pub struct SetDrvBufferOptions: i32 {
        const BUFFER_WRITES = 0x1;
        const ASYNC_WRITES = 0x2;
        const READ_AHEAD = 0x4;
        const TWO_FM = 0x10;
        const FAST_MTEOM = 0x20;
        const CAN_BSR = 0x100;
        const CAN_PARTITIONS = 0x400;
        const SCSI2LOGICAL = 0x800;
    }
}
