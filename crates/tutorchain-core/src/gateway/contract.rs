//! Solidity interface of the tutoring contract.
//!
//! Only the functions the marketplace calls are declared. Selectors and
//! argument/return encodings are generated from these signatures.

use alloy_sol_types::sol;

sol! {
    interface ITutorMarketplace {
        function tutors(address tutor) external view returns (
            string name,
            uint256 ratePerHour,
            bool isListed,
            uint256 totalSessions,
            uint256 totalRating,
            bool isVerified
        );

        function bookSession(address tutor, uint256 duration) external payable;

        function listTutor(string name, uint256 ratePerHour) external;

        function completeSession(uint256 sessionId, uint256 rating) external;

        function sessions(uint256 sessionId) external view returns (
            uint256 rating,
            uint256 duration,
            uint256 timestamp
        );

        function getUserSessions(address user) external view returns (uint256[] ids);
    }
}
