//! Launchpad-owned contracts.

use ethers::contract::abigen;

abigen!(
    PresaleManager,
    r#"[
        function activatePresale(address token, address whitelist, uint256 hardCap, uint256 price, uint256 maxContribution, uint256 startTime, uint256 duration, uint256 whitelistDuration, uint256 claimTime, uint256 sweepDuration) external
        function presaleCount() external view returns (uint256)
        function presales(uint256 presaleId) external view returns (uint256 startTime, uint256 endTime, uint256 claimTime, uint256 claimDelay, bool finalized, uint256 hardCap, uint256 totalRaised, uint256 tokensNeeded, uint256 initialReleaseBps, uint256 cliffDuration, uint256 vestingDuration, uint256 sweepDuration)
        function startTime() external view returns (uint256)
        function contribute(address user) external payable
        function getClaimableTokens(address user) external view returns (uint256)
        function getContribution(address user) external view returns (uint256)
        function getClaimedTokens(address user) external view returns (uint256)
        function hasUserBeenRefunded(address user) external view returns (bool)
        function claimTokens(uint256 presaleId) external
        function refund(uint256 presaleId) external
        function sweepUnclaimedTokens(uint256 presaleId) external
    ]"#,
);

abigen!(
    ProjectToken,
    r#"[
        function name() external view returns (string)
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
        function totalSupply() external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#,
);

abigen!(
    TokenLocker,
    r#"[
        function setBeneficiaries(address[] beneficiaries, uint256[] amounts) external
        function resetBeneficiaries(address[] beneficiaries, uint256[] amounts) external
        function finalize() external
        function isFinalized() external view returns (bool)
    ]"#,
);

abigen!(
    Airdrop,
    r#"[
        function setAllocations(address[] recipients, uint256[] amounts) external
        function clearAllocations(address[] recipients) external
        function claim() external
    ]"#,
);
