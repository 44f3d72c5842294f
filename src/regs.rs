//! RTL8125 register definitions
#![allow(dead_code)]

/// MAC register offsets
pub mod mac {
    pub const MAC0: u16 = 0x00; // MAC address
    pub const MAC4: u16 = 0x04; // MAC address (continued)
    pub const MAR0: u16 = 0x08; // Multicast filter
    pub const MAR4: u16 = 0x0C; // Multicast filter (continued)
    pub const COUNTER_ADDR_LOW: u16 = 0x10; // Dump Tally Counter Command (low)
    pub const COUNTER_ADDR_HIGH: u16 = 0x14; // Dump Tally Counter Command (high)
    pub const TNPDS_LO: u16 = 0x20; // Transmit Normal Priority Descriptors (low)
    pub const TNPDS_HI: u16 = 0x24; // Transmit Normal Priority Descriptors (high)
    pub const INT_CFG0: u16 = 0x34; // Interrupt configuration 0
    pub const CMD: u16 = 0x37; // Command Register
    pub const IMR0: u16 = 0x38; // Interrupt Mask Register (32-bit on 8125)
    pub const ISR0: u16 = 0x3C; // Interrupt Status Register (32-bit on 8125)
    pub const TCR: u16 = 0x40; // Transmit Configuration Register
    pub const RCR: u16 = 0x44; // Receive Configuration Register
    pub const CFG_9346: u16 = 0x50; // 93C46 Command Register
    pub const TIMER_INT0: u16 = 0x58; // Interrupt mitigation timer
    pub const PHYSTATUS: u16 = 0x6C; // PHY Status Register
    pub const INT_CFG1: u16 = 0x7A; // Interrupt configuration 1
    pub const TPPOLL: u16 = 0x90; // Transmit Polling (8125)
    pub const RMS: u16 = 0xDA; // Rx Max Size
    pub const CPCMD: u16 = 0xE0; // C+ Command Register
    pub const RDSAR_LO: u16 = 0xE4; // Receive Descriptor Start Address (low)
    pub const RDSAR_HI: u16 = 0xE8; // Receive Descriptor Start Address (high)
    pub const MTPS: u16 = 0xEC; // Max Transmit Packet Size
    pub const SW_TAIL_PTR0: u16 = 0x2800; // Tx software tail pointer, queue 0
    pub const HW_CLO_PTR0: u16 = 0x2804; // Tx hardware close pointer, queue 0

    // Command Register bits
    pub const CMD_RST: u8 = 1 << 4; // Reset
    pub const CMD_RE: u8 = 1 << 3; // Receiver Enable
    pub const CMD_TE: u8 = 1 << 2; // Transmitter Enable

    // 93C46 Command Register
    pub const CFG_9346_LOCK: u8 = 0x00;
    pub const CFG_9346_UNLOCK: u8 = 0xC0;

    // Tally counter command bits
    pub const COUNTER_RESET: u32 = 1 << 0;
    pub const COUNTER_DUMP: u32 = 1 << 3;

    // Receive Configuration Register bits
    pub const RCR_AAP: u32 = 1 << 0; // Accept All Packets
    pub const RCR_APM: u32 = 1 << 1; // Accept Physical Match
    pub const RCR_AM: u32 = 1 << 2; // Accept Multicast
    pub const RCR_AB: u32 = 1 << 3; // Accept Broadcast
    pub const RCR_ACCEPT_MASK: u32 = RCR_AAP | RCR_APM | RCR_AM | RCR_AB;
    pub const RCR_MXDMA_UNLIMITED: u32 = 7 << 8;
    pub const RCR_RXFTH_NONE: u32 = 7 << 13;

    // Transmit Configuration Register bits
    pub const TCR_MXDMA_UNLIMITED: u32 = 7 << 8;
    pub const TCR_IFG_NORMAL: u32 = 3 << 24;

    // C+ Command Register bits
    pub const CPCMD_RX_VLAN: u16 = 1 << 6;
    pub const CPCMD_RX_CHKSUM: u16 = 1 << 5;
}

/// Interrupt status / mask bits
pub mod intr {
    pub const ROK: u32 = 1 << 0; // Receive OK
    pub const RER: u32 = 1 << 1; // Receive Error
    pub const TOK: u32 = 1 << 2; // Transmit OK
    pub const TER: u32 = 1 << 3; // Transmit Error
    pub const RDU: u32 = 1 << 4; // Rx Descriptor Unavailable
    pub const LINKCHG: u32 = 1 << 5; // Link Change
    pub const FOVW: u32 = 1 << 6; // Rx FIFO Overflow
    pub const TDU: u32 = 1 << 7; // Tx Descriptor Unavailable
    pub const SWINT: u32 = 1 << 8; // Software Interrupt
    pub const PCS_TIMEOUT: u32 = 1 << 14; // Mitigation timer expired
    pub const SERR: u32 = 1 << 15; // System Error

    pub const MASK_RXTX: u32 = SERR | LINKCHG | RDU | TOK | ROK;
    pub const MASK_TIMER: u32 = SERR | LINKCHG | RDU | PCS_TIMEOUT;
    pub const MASK_POLL: u32 = SERR | LINKCHG;
}

/// Descriptor format for RTL8125 (v2 descriptors)
pub mod descriptor {
    // Common descriptor bits
    pub const DESC_OWN: u32 = 1 << 31; // Ownership (1 = NIC, 0 = CPU)
    pub const DESC_EOR: u32 = 1 << 30; // End of Ring
    pub const DESC_FS: u32 = 1 << 29; // First Segment
    pub const DESC_LS: u32 = 1 << 28; // Last Segment

    // TX Descriptor opts1 bits
    pub const TX_GTSENV4: u32 = 1 << 26; // Giant send, IPv4
    pub const TX_GTSENV6: u32 = 1 << 25; // Giant send, IPv6
    pub const TX_GTTCPHO_SHIFT: u32 = 18; // TCP header offset (giant send)
    pub const TX_GTTCPHO_MAX: u32 = 0x7F;
    pub const TX_LEN_MASK: u32 = 0xFFFF;

    // TX Descriptor opts2 bits
    pub const TX_UDP_CS: u32 = 1 << 31;
    pub const TX_TCP_CS: u32 = 1 << 30;
    pub const TX_IPV4_CS: u32 = 1 << 29;
    pub const TX_IPV6_CS: u32 = 1 << 28;
    pub const TX_TCPHO_SHIFT: u32 = 18; // Transport header offset (checksum)
    pub const TX_TCPHO_MAX: u32 = 0x3FF;
    pub const TX_MSS_SHIFT: u32 = 18;
    pub const TX_MSS_MAX: u32 = 0x7FF;
    pub const TX_VLAN_TAG: u32 = 1 << 17;

    // RX Descriptor opts1 bits
    pub const RX_BOVF: u32 = 1 << 24; // Buffer Overflow
    pub const RX_FOVF: u32 = 1 << 23; // FIFO Overflow
    pub const RX_RWT: u32 = 1 << 22; // Receive Watchdog Timer Expired
    pub const RX_RES: u32 = 1 << 21; // Receive Error Summary
    pub const RX_RUNT: u32 = 1 << 20; // Runt Packet
    pub const RX_CRC: u32 = 1 << 19; // CRC Error
    pub const RX_PID1: u32 = 1 << 18; // Protocol ID bit 1
    pub const RX_PID0: u32 = 1 << 17; // Protocol ID bit 0
    pub const RX_PROTO_UDP: u32 = RX_PID1;
    pub const RX_PROTO_TCP: u32 = RX_PID0;
    pub const RX_PROTO_IP: u32 = RX_PID1 | RX_PID0;
    pub const RX_PROTO_MASK: u32 = RX_PROTO_IP;
    pub const RX_IPF: u32 = 1 << 16; // IP Checksum Failure
    pub const RX_UDPF: u32 = 1 << 15; // UDP Checksum Failure
    pub const RX_TCPF: u32 = 1 << 14; // TCP Checksum Failure
    pub const RX_LEN_MASK: u32 = 0x3FFF; // Frame Length

    // RX Descriptor opts2 bits
    pub const RX_V6F: u32 = 1 << 31;
    pub const RX_V4F: u32 = 1 << 30;
    pub const RX_VLAN_TAG: u32 = 1 << 16;
}

/// PHY status register (16-bit on the 8125)
pub mod phy {
    use tock_registers::register_bitfields;

    register_bitfields! [
        u16,

        pub PhyStatus [
            FULL_DUP OFFSET(0) NUMBITS(1) [],
            LINK_STS OFFSET(1) NUMBITS(1) [],
            SPEED_10 OFFSET(2) NUMBITS(1) [],
            SPEED_100 OFFSET(3) NUMBITS(1) [],
            SPEED_1000F OFFSET(4) NUMBITS(1) [],
            RX_FLOW_CTRL OFFSET(5) NUMBITS(1) [],
            TX_FLOW_CTRL OFFSET(6) NUMBITS(1) [],
            SPEED_2500F OFFSET(10) NUMBITS(1) [],
        ],
    ];
}
