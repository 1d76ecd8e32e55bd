//! Built-in minimal documentation corpus.
//!
//! Seeds the index when the documentation sources cannot be fetched so
//! retrieval stays operational offline. Short descriptions of the most
//! commonly queried telemetry message types.

use super::chunker::ChunkType;

pub const BUILTIN_CORPUS: &[(&str, ChunkType)] = &[
    (
        "ATT (attitude): vehicle attitude estimates. Fields: DesRoll/Roll, DesPitch/Pitch, \
         DesYaw/Yaw in degrees (Des* are the autopilot's targets), ErrRP and ErrYaw as estimator \
         error measures. Large sustained gaps between desired and actual attitude point at tuning \
         or actuator problems.",
        ChunkType::Paragraph,
    ),
    (
        "GPS: global position fixes. Fields: Status (0 none, 2 2D fix, 3 3D fix), Lat/Lng in \
         degrees, Alt in meters above sea level, Spd ground speed in m/s, GCrs ground course in \
         degrees, NSats satellite count, HDop horizontal dilution of precision. HDop above ~2.0 or \
         NSats below 6 usually means a poor fix. Indexed instances appear as GPS[0], GPS[1] for \
         multiple receivers.",
        ChunkType::Paragraph,
    ),
    (
        "BAT (battery): pack monitoring. Fields: Volt voltage, VoltR resting-estimate voltage, \
         Curr current in amps, CurrTot consumed mAh, EnrgTot consumed Wh, Temp pack temperature \
         when a sensor is fitted, RemPct remaining percent. Sagging Volt under load together with \
         rising Curr is the normal discharge signature; a sudden Volt drop is a failure indicator.",
        ChunkType::Paragraph,
    ),
    (
        "CTUN (control tuning): altitude controller state. Fields: ThI throttle in, ThO throttle \
         out, DAlt desired altitude, Alt achieved altitude, BAlt barometric altitude, DSAlt \
         desired sonar altitude, SAlt sonar altitude, CRt climb rate in cm/s. Compare DAlt to Alt \
         for altitude-hold quality.",
        ChunkType::Paragraph,
    ),
    (
        "MODE: flight mode changes. Fields: Mode (mode name or number), ModeNum, Rsn reason code \
         for the change. Frequent unexpected changes to RTL or LAND often trace back to failsafes.",
        ChunkType::Paragraph,
    ),
    (
        "VIBE (vibration): IMU vibration levels. Fields: VibeX, VibeY, VibeZ in m/s/s, plus \
         Clip0/Clip1/Clip2 accelerometer clipping counters. Sustained vibration above ~30 m/s/s \
         or any growing clip count degrades altitude and position estimation.",
        ChunkType::Paragraph,
    ),
    (
        "RCIN / RCOU: radio input channels and servo/motor output channels. Fields C1..C14 are \
         PWM values in microseconds, typically 1000-2000 with 1500 at center. On a multirotor, \
         persistent large spread between opposite RCOU motor outputs indicates a thrust imbalance.",
        ChunkType::Paragraph,
    ),
    (
        "IMU: inertial sensor samples. Fields: GyrX/GyrY/GyrZ angular rates in rad/s, \
         AccX/AccY/AccZ accelerations in m/s/s, plus sensor health and temperature fields. \
         Indexed instances IMU[0], IMU[1] correspond to separate sensors.",
        ChunkType::Paragraph,
    ),
    (
        "ERR (error events): subsystem error reports. Fields: Subsys subsystem id, ECode error \
         code; a code of 0 generally signals the error clearing. Common subsystems: 2 radio, 3 \
         compass, 5 battery failsafe, 6 GPS, 11 GPS glitch, 12 crash check.",
        ChunkType::Paragraph,
    ),
    (
        "BARO (barometer): pressure altitude. Fields: Alt barometric altitude in meters, Press \
         pressure in Pa, Temp temperature in degrees C, CRt climb rate. Baro Alt drifts with \
         weather; compare against GPS Alt for sanity.",
        ChunkType::Paragraph,
    ),
    (
        "Time alignment: every time-series table carries time_boot_ms, milliseconds since boot. \
         Join or filter different message types on overlapping time_boot_ms ranges to correlate \
         events, e.g. battery sag against throttle output.",
        ChunkType::Paragraph,
    ),
    (
        "```\nSELECT MAX(Alt) FROM gps_0_data\nSELECT AVG(Curr) FROM bat_data WHERE \
         time_boot_ms BETWEEN 100000 AND 200000\nSELECT Mode, COUNT(*) FROM mode_data GROUP BY \
         Mode\n```",
        ChunkType::Code,
    ),
];
